//! Line-oriented configuration file model.
//!
//! A [`ConfigBuffer`] is loaded whole, patched in memory through structured
//! line operations, and flushed back as a single write. The same patch code
//! runs whether the file lives on this machine ([`LocalFiles`]) or on the peer
//! ([`ShellFiles`], which reads with `cat` and writes with `echo`).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, StressError};
use crate::exec::{shell_quote, Shell};

// ---------------------------------------------------------------------------
// File access
// ---------------------------------------------------------------------------

/// Whole-file read/write provider.
#[async_trait]
pub trait FileIo: Send {
    async fn read(&mut self, path: &str) -> Result<String>;
    async fn write(&mut self, path: &str, text: &str) -> Result<()>;
    /// Size in bytes, or `None` if the file does not exist.
    async fn size(&mut self, path: &str) -> Result<Option<u64>>;
}

/// Direct access to this machine's file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

#[async_trait]
impl FileIo for LocalFiles {
    async fn read(&mut self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&mut self, path: &str, text: &str) -> Result<()> {
        Ok(tokio::fs::write(path, text).await?)
    }

    async fn size(&mut self, path: &str) -> Result<Option<u64>> {
        match tokio::fs::metadata(Path::new(path)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// File access built from commands on a [`Shell`].
pub struct ShellFiles<'a> {
    shell: &'a mut dyn Shell,
    timeout: Duration,
}

impl<'a> ShellFiles<'a> {
    pub fn new(shell: &'a mut dyn Shell, timeout: Duration) -> Self {
        Self { shell, timeout }
    }
}

#[async_trait]
impl FileIo for ShellFiles<'_> {
    async fn read(&mut self, path: &str) -> Result<String> {
        let res = self.shell.run_ok(&format!("cat {path}"), self.timeout).await?;
        Ok(res.text())
    }

    async fn write(&mut self, path: &str, text: &str) -> Result<()> {
        // `echo` supplies the final newline itself.
        let cmd = match text.strip_suffix('\n') {
            Some(body) => format!("echo {} > {path}", shell_quote(body)),
            None if text.is_empty() => format!(": > {path}"),
            None => format!("printf %s {} > {path}", shell_quote(text)),
        };
        self.shell.run_ok(&cmd, self.timeout).await?;
        Ok(())
    }

    async fn size(&mut self, path: &str) -> Result<Option<u64>> {
        let res = self.shell.run(&format!("stat -c %s {path}"), self.timeout).await?;
        if !res.success() {
            return Ok(None);
        }
        let size = res
            .last_line()
            .and_then(|l| l.parse::<u64>().ok())
            .ok_or_else(|| {
                StressError::ConfigValidation(format!("unexpected stat output for {path}: {}", res.text()))
            })?;
        Ok(Some(size))
    }
}

// ---------------------------------------------------------------------------
// ConfigBuffer
// ---------------------------------------------------------------------------

/// In-memory lines of one configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBuffer {
    path: String,
    lines: Vec<String>,
}

impl ConfigBuffer {
    pub fn from_text(path: &str, text: &str) -> Self {
        Self {
            path: path.to_string(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Read `path` through `io`.
    pub async fn load(io: &mut dyn FileIo, path: &str) -> Result<Self> {
        let text = io.read(path).await?;
        let buffer = Self::from_text(path, &text);
        debug!(%path, lines = buffer.lines.len(), "loaded config buffer");
        Ok(buffer)
    }

    /// Write the whole buffer back to its path through `io`.
    pub async fn flush(&self, io: &mut dyn FileIo) -> Result<()> {
        debug!(path = %self.path, lines = self.lines.len(), "flushing config buffer");
        io.write(&self.path, &self.text()).await
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// File contents, one newline after every line.
    pub fn text(&self) -> String {
        self.lines.iter().map(|l| format!("{l}\n")).collect()
    }

    pub fn find_line(&self, predicate: impl Fn(&str) -> bool) -> Option<usize> {
        self.lines.iter().position(|l| predicate(l.as_str()))
    }

    pub fn replace_line(&mut self, index: usize, text: impl Into<String>) {
        self.lines[index] = text.into();
    }

    pub fn append_line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    /// Replace the first line matching `predicate`, or append `replacement`.
    pub fn patch_or_append(&mut self, predicate: impl Fn(&str) -> bool, replacement: &str) {
        match self.find_line(predicate) {
            Some(index) => self.replace_line(index, replacement),
            None => self.append_line(replacement),
        }
    }

    /// Append `line` unless some line already matches `predicate`.
    pub fn ensure_line(&mut self, predicate: impl Fn(&str) -> bool, line: &str) {
        if self.find_line(predicate).is_none() {
            self.append_line(line);
        }
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// True if `line` names `name` and, later on the line, `address`.
fn maps_name_to_address(line: &str, name: &str, address: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.iter().position(|t| *t == name) {
        Some(at) => tokens[at + 1..].contains(&address),
        None => false,
    }
}

/// Ensure `<name> <address>` lines exist for every pair. Existing lines are
/// never removed or rewritten.
pub fn patch_identity_mapping(buffer: &mut ConfigBuffer, entries: &[(&str, &str)]) {
    for (name, address) in entries {
        buffer.ensure_line(
            |l| maps_name_to_address(l, name, address),
            &format!("{name} {address}"),
        );
    }
}

/// Point the `other_ids=` directive at `own:opposite`.
pub fn patch_other_ids(buffer: &mut ConfigBuffer, own: &str, opposite: &str) -> Result<()> {
    let index = buffer
        .find_line(|l| l.trim_start().starts_with("other_ids="))
        .ok_or_else(|| {
            StressError::ConfigValidation(format!("no other_ids directive in {}", buffer.path()))
        })?;
    buffer.replace_line(index, format!("other_ids={own}:{opposite}"));
    Ok(())
}

/// Set the net-id column of each interface line. Interfaces and net-ids are
/// paired positionally.
pub fn patch_net_ids(buffer: &mut ConfigBuffer, interfaces: &[String], net_ids: &[String]) -> Result<()> {
    if interfaces.len() != net_ids.len() {
        return Err(StressError::ConfigValidation(format!(
            "{} interfaces but {} net ids",
            interfaces.len(),
            net_ids.len()
        )));
    }

    for (interface, net_id) in interfaces.iter().zip(net_ids) {
        let index = buffer
            .find_line(|l| l.split_whitespace().next() == Some(interface.as_str()))
            .ok_or_else(|| {
                StressError::ConfigValidation(format!(
                    "interface {interface} not found in {}",
                    buffer.path()
                ))
            })?;

        let mut columns: Vec<&str> = buffer.lines()[index].split_whitespace().collect();
        if columns.len() > 1 {
            columns[1] = net_id.as_str();
        } else {
            columns.push(net_id.as_str());
        }
        let patched = columns.join(" ");
        buffer.replace_line(index, patched);
    }
    Ok(())
}

/// Restore `IPADDR=` in an ifcfg file.
pub fn patch_ipaddr(buffer: &mut ConfigBuffer, address: &str) {
    buffer.patch_or_append(
        |l| l.trim_start().starts_with("IPADDR="),
        &format!("IPADDR={address}"),
    );
}
