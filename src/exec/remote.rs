//! Password-authenticated ssh conversation with prompt synchronization.
//!
//! The system `ssh` client runs inside a pseudo-terminal so that it asks for
//! the password interactively. Once logged in, the remote shell is replaced
//! with a bare `bash`, aliases and terminal echo are disabled, and `PS1` is
//! set to a per-session marker. Every command then ends when that marker
//! reappears; the exit code is read with a follow-up `echo $?`.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CommandResult, Connector, Shell};
use crate::error::{Result, StressError};

/// Prompts ssh may print before the session is up.
const HOSTKEY_PROMPT: &str = "(yes/no";
const PASSWORD_PROMPT: &str = "assword:";
const DENIED: &str = "Permission denied";

/// Shell prompt endings accepted as "logged in" before the marker is set.
const LOGIN_PROMPTS: [&str; 3] = ["$ ", "# ", "> "];

/// Grace period for resynchronizing after an interrupted command.
const RESYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// The live conversation with the peer.
pub struct RemoteSession {
    address: String,
    user: String,
    marker: String,
    writer: Box<dyn Write + Send>,
    output: UnboundedReceiver<Vec<u8>>,
    pending: String,
    child: Box<dyn Child + Send + Sync>,
    // Kept alive so the pty stays open.
    _master: Box<dyn MasterPty + Send>,
}

impl RemoteSession {
    /// Log in to `address` as `user` and negotiate the prompt marker.
    ///
    /// Fails with [`StressError::Connection`] if authentication or prompt
    /// negotiation does not complete within `timeout`.
    pub async fn login(address: &str, user: &str, password: &str, timeout: Duration) -> Result<Self> {
        info!(%address, %user, "opening ssh session to peer");

        let mut cmd = CommandBuilder::new("ssh");
        cmd.args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "PubkeyAuthentication=no",
            "-o",
            "PreferredAuthentications=password,keyboard-interactive",
            "-o",
            "NumberOfPasswordPrompts=1",
            "-l",
            user,
            address,
        ]);

        let mut session = Self::spawn(cmd, address, user)?;
        session.authenticate(password, timeout).await?;
        session.configure_shell(timeout).await?;
        info!(%address, "ssh session ready");
        Ok(session)
    }

    /// Start `cmd` on a fresh pty and attach the reader thread.
    fn spawn(mut cmd: CommandBuilder, address: &str, user: &str) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                // Wide enough that long harness output lines are not wrapped.
                cols: 1024,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| StressError::Connection(format!("failed to open pty: {e}")))?;

        cmd.env("TERM", "dumb");
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| StressError::Connection(format!("failed to spawn session: {e}")))?;
        // Only the child holds the slave end; EOF on the master means it exited.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| StressError::Connection(format!("failed to clone pty reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| StressError::Connection(format!("failed to take pty writer: {e}")))?;

        Ok(Self {
            address: address.to_string(),
            user: user.to_string(),
            marker: format!("[nicstress-{}]# ", short_id(12)),
            writer,
            output: spawn_reader(reader),
            pending: String::new(),
            child,
            _master: pair.master,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    async fn authenticate(&mut self, password: &str, timeout: Duration) -> Result<()> {
        loop {
            match self
                .expect(&[HOSTKEY_PROMPT, PASSWORD_PROMPT, DENIED], timeout)
                .await?
            {
                Some((0, _)) => self.send_line("yes")?,
                Some((1, _)) => {
                    self.send_line(password)?;
                    break;
                }
                Some(_) => return Err(self.rejected()),
                None => {
                    return Err(StressError::Connection(format!(
                        "no password prompt from {} within {}s",
                        self.address,
                        timeout.as_secs()
                    )))
                }
            }
        }

        let mut patterns = vec![DENIED, PASSWORD_PROMPT];
        patterns.extend(LOGIN_PROMPTS);
        match self.expect(&patterns, timeout).await? {
            Some((0 | 1, _)) => Err(self.rejected()),
            Some(_) => Ok(()),
            None => Err(StressError::Connection(format!(
                "no shell prompt from {} after login",
                self.address
            ))),
        }
    }

    async fn configure_shell(&mut self, timeout: Duration) -> Result<()> {
        self.send_line("exec bash --norc --noprofile")?;

        // Split the marker across two quoted words so the echoed command line
        // itself never matches it.
        let (head, tail) = self.marker.split_at(self.marker.len() - 2);
        let setup = format!(
            "unset PROMPT_COMMAND; unalias -a; bind 'set enable-bracketed-paste off' 2>/dev/null; \
             stty -echo; PS2=''; PS1='{head}''{tail}'"
        );
        self.send_line(&setup)?;

        let marker = self.marker.clone();
        if self.expect(&[&marker], timeout).await?.is_none() {
            return Err(StressError::Connection(format!(
                "prompt negotiation with {} timed out",
                self.address
            )));
        }

        // One empty round trip drains anything queued behind the first prompt.
        self.send_line("")?;
        if self.expect(&[&marker], timeout).await?.is_none() {
            return Err(StressError::Connection(format!(
                "prompt resync with {} timed out",
                self.address
            )));
        }
        Ok(())
    }

    fn rejected(&self) -> StressError {
        StressError::Connection(format!(
            "authentication as {}@{} rejected",
            self.user, self.address
        ))
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| StressError::Connection(format!("write to {} failed: {e}", self.address)))
    }

    /// Wait until one of `patterns` shows up in the output.
    ///
    /// Returns the index of the pattern that matched first and the text
    /// preceding it, consuming both. `None` means the timeout elapsed.
    async fn expect(
        &mut self,
        patterns: &[&str],
        timeout: Duration,
    ) -> Result<Option<(usize, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            let earliest = patterns
                .iter()
                .enumerate()
                .filter_map(|(i, p)| self.pending.find(p).map(|pos| (pos, i, p.len())))
                .min();
            if let Some((pos, index, len)) = earliest {
                let before = self.pending[..pos].to_string();
                self.pending.drain(..pos + len);
                return Ok(Some((index, before)));
            }

            match tokio::time::timeout_at(deadline, self.output.recv()).await {
                Ok(Some(chunk)) => self.pending.push_str(&String::from_utf8_lossy(&chunk)),
                Ok(None) => {
                    return Err(StressError::Connection(format!(
                        "session to {} closed",
                        self.address
                    )))
                }
                Err(_) => return Ok(None),
            }
        }
    }

    /// Interrupt a stuck command and try to get back to a clean prompt.
    ///
    /// The interrupt can leave more than one prompt queued, so the session is
    /// only considered clean once a fresh sync token and the marker after it
    /// have been read.
    async fn resync(&mut self) {
        let token = format!("nicstress-sync-{}", short_id(8));
        let (head, tail) = token.split_at(token.len() / 2);
        if self.writer.write_all(b"\x03").is_err()
            || self.send_line(&format!("echo {head}''{tail}")).is_err()
        {
            warn!(address = %self.address, "could not interrupt timed-out command");
            return;
        }

        let marker = self.marker.clone();
        let synced = match self.expect(&[&token], RESYNC_TIMEOUT).await {
            Ok(Some(_)) => matches!(self.expect(&[&marker], RESYNC_TIMEOUT).await, Ok(Some(_))),
            _ => false,
        };
        if synced {
            self.pending.clear();
        } else {
            warn!(address = %self.address, "session did not resync after timeout");
        }
    }

    async fn wait_prompt(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let marker = self.marker.clone();
        match self.expect(&[&marker], timeout).await? {
            Some((_, text)) => Ok(text),
            None => {
                self.resync().await;
                Err(StressError::CommandTimeout {
                    command: command.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl Shell for RemoteSession {
    fn label(&self) -> &str {
        &self.address
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandResult> {
        info!(peer = %self.address, %command, "running command on peer");

        self.send_line(command)?;
        let body = self.wait_prompt(command, timeout).await?;

        self.send_line("echo $?")?;
        let status = self.wait_prompt(command, timeout).await?;
        let exit_code = output_lines(&status)
            .last()
            .and_then(|l| l.trim().parse::<i32>().ok())
            .ok_or_else(|| {
                StressError::Connection(format!(
                    "could not read exit status of '{command}' from {}",
                    self.address
                ))
            })?;

        let lines = output_lines(&body);
        debug!(peer = %self.address, %command, exit_code, lines = lines.len(), "peer command finished");
        Ok(CommandResult::new(lines, exit_code))
    }

    async fn close(&mut self) -> Result<()> {
        debug!(address = %self.address, "closing ssh session");
        self.send_line("exit")?;
        // Wait briefly for ssh to hang up; the child is killed on drop anyway.
        let deadline = Instant::now() + Duration::from_secs(2);
        while let Ok(Some(_)) = tokio::time::timeout_at(deadline, self.output.recv()).await {}
        Ok(())
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
    }
}

/// Opens [`RemoteSession`]s.
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn login(
        &self,
        address: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Box<dyn Shell>> {
        let session = RemoteSession::login(address, user, password, timeout).await?;
        Ok(Box::new(session))
    }
}

fn short_id(len: usize) -> String {
    let id = uuid::Uuid::new_v4().as_simple().to_string();
    id[..len.min(id.len())].to_string()
}

/// Forward pty output to the async side from a blocking reader thread.
fn spawn_reader(mut reader: Box<dyn Read + Send>) -> UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = unbounded_channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("pty read error: {}", e);
                    break;
                }
            }
        }
        debug!("pty reader thread exiting");
    });
    rx
}

/// Split raw terminal text into clean lines.
///
/// Drops carriage returns and ANSI escape sequences.
fn output_lines(raw: &str) -> Vec<String> {
    let cleaned = strip_escapes(raw);
    let mut lines: Vec<String> = cleaned
        .split('\n')
        .map(|l| l.replace('\r', ""))
        .collect();
    // The text before a prompt ends with the command's trailing newline.
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

fn strip_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // CSI: parameters then one final byte in @..~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            } else {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_lines_strips_cr_and_trailing_newline() {
        let raw = "eth2 ACTIVE\r\neth3 ACTIVE\r\n";
        assert_eq!(output_lines(raw), vec!["eth2 ACTIVE", "eth3 ACTIVE"]);
    }

    #[test]
    fn test_output_lines_drops_bracketed_paste_codes() {
        let raw = "\x1b[?2004l\rlpar-peer\r\n\x1b[?2004h";
        assert_eq!(output_lines(raw), vec!["lpar-peer"]);
    }

    #[test]
    fn test_empty_output_has_no_lines() {
        assert!(output_lines("").is_empty());
    }

    #[test]
    fn test_strip_escapes_keeps_plain_text() {
        assert_eq!(strip_escapes("\x1b[01;31mred\x1b[0m text"), "red text");
    }

    // The conversation below runs against a local bash on a real pty, which
    // is the same shell the peer is switched to after login.

    const T: Duration = Duration::from_secs(10);

    async fn local_bash() -> RemoteSession {
        let mut cmd = CommandBuilder::new("bash");
        cmd.args(["--norc", "--noprofile"]);
        let mut session = RemoteSession::spawn(cmd, "localhost", "tester").unwrap();
        session.configure_shell(T).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_marker_negotiation_and_exit_codes() {
        let mut session = local_bash().await;
        assert!(session.marker().starts_with("[nicstress-"));

        let res = session.run("echo one; echo two", T).await.unwrap();
        assert_eq!(res.lines, vec!["one", "two"]);
        assert_eq!(res.exit_code, 0);

        let res = session.run("ls /nonexistent/nicstress", T).await.unwrap();
        assert_eq!(res.exit_code, 2);
        assert!(res.contains("No such file or directory"));

        let res = session.run("true", T).await.unwrap();
        assert!(res.lines.is_empty());
        assert!(res.success());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_then_session_still_usable() {
        let mut session = local_bash().await;

        let err = session
            .run("sleep 5", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StressError::CommandTimeout { timeout_secs: 1, .. }));

        let res = session.run("echo after", T).await.unwrap();
        assert_eq!(res.lines, vec!["after"]);
        assert!(res.success());
    }

    #[tokio::test]
    async fn test_quoted_multiline_write_through_shell_files() {
        use crate::buffer::{ConfigBuffer, FileIo, ShellFiles};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts").to_string_lossy().to_string();
        let text = "127.0.0.1 localhost\n# it's the peer\nlpar-peer 10.0.0.2\n";

        let mut session = local_bash().await;
        let mut files = ShellFiles::new(&mut session, T);
        let buffer = ConfigBuffer::from_text(&path, text);
        buffer.flush(&mut files).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
        let back = ConfigBuffer::load(&mut files, &path).await.unwrap();
        assert_eq!(back, buffer);
        assert_eq!(files.size(&path).await.unwrap(), Some(text.len() as u64));
    }
}
