//! Scripted shell for testing.
//!
//! Commands are answered by the first matching rule; rules can hold a queue of
//! results (the last one repeats). Commands no rule matches fall through to a
//! small in-memory file system that understands `cat`, `echo '...' > path`,
//! `: > path`, `stat -c %s`, `test -s`, and `ls`, so file patching over a
//! shell can be exercised. Anything else succeeds with no output.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandResult, Connector, Shell};
use crate::error::{Result, StressError};

#[derive(Debug)]
struct Rule {
    pattern: String,
    results: VecDeque<CommandResult>,
}

#[derive(Debug, Default)]
struct MockShellInner {
    rules: Vec<Rule>,
    files: HashMap<String, String>,
    log: Vec<String>,
    closed: bool,
}

/// Mock shell. Clones share state, so a test can keep a handle after moving
/// one into the code under test.
#[derive(Debug, Clone)]
pub struct MockShell {
    label: String,
    inner: Arc<Mutex<MockShellInner>>,
}

impl MockShell {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockShellInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer commands containing `pattern` with `result`.
    pub fn on(&self, pattern: &str, result: CommandResult) -> &Self {
        self.on_sequence(pattern, vec![result])
    }

    /// Answer successive commands containing `pattern` with `results` in
    /// order; the final result repeats.
    pub fn on_sequence(&self, pattern: &str, results: Vec<CommandResult>) -> &Self {
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            results: results.into(),
        });
        self
    }

    /// Seed a file in the in-memory file system.
    pub fn put_file(&self, path: &str, contents: &str) -> &Self {
        self.lock().files.insert(path.to_string(), contents.to_string());
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    /// Every command issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// How many issued commands contain `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lock().log.iter().filter(|c| c.contains(needle)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl MockShellInner {
    fn answer(&mut self, command: &str) -> CommandResult {
        if let Some(rule) = self.rules.iter_mut().find(|r| command.contains(&r.pattern)) {
            return if rule.results.len() > 1 {
                rule.results.pop_front().unwrap_or_default()
            } else {
                rule.results.front().cloned().unwrap_or_default()
            };
        }
        self.file_command(command)
            .unwrap_or_else(|| CommandResult::new(Vec::new(), 0))
    }

    fn file_command(&mut self, command: &str) -> Option<CommandResult> {
        let missing = |path: &str| {
            CommandResult::failed(&format!("{path}: No such file or directory"), 1)
        };

        if let Some(path) = command.strip_prefix("cat ") {
            let path = path.trim();
            return Some(match self.files.get(path) {
                Some(text) => CommandResult::ok(text),
                None => missing(path),
            });
        }
        if let Some(path) = command.strip_prefix("stat -c %s ") {
            let path = path.trim();
            return Some(match self.files.get(path) {
                Some(text) => CommandResult::ok(&text.len().to_string()),
                None => missing(path),
            });
        }
        if let Some(path) = command.strip_prefix("test -s ") {
            let non_empty = self.files.get(path.trim()).is_some_and(|t| !t.is_empty());
            return Some(CommandResult::new(Vec::new(), if non_empty { 0 } else { 1 }));
        }
        if let Some(path) = command.strip_prefix("ls ") {
            let path = path.trim();
            return Some(if self.files.contains_key(path) {
                CommandResult::ok(path)
            } else {
                missing(path)
            });
        }
        if let Some(path) = command.strip_prefix(": > ") {
            self.files.insert(path.trim().to_string(), String::new());
            return Some(CommandResult::new(Vec::new(), 0));
        }
        if let Some(rest) = command.strip_prefix("echo ") {
            if let Some(split) = rest.rfind(" > ") {
                let text = unquote(&rest[..split]);
                let path = rest[split + 3..].trim().to_string();
                self.files.insert(path, format!("{text}\n"));
                return Some(CommandResult::new(Vec::new(), 0));
            }
        }
        None
    }
}

/// Reverse of [`super::shell_quote`] for a single quoted word.
fn unquote(word: &str) -> String {
    let word = word.trim();
    let inner = word
        .strip_prefix('\'')
        .and_then(|w| w.strip_suffix('\''))
        .unwrap_or(word);
    inner.replace(r"'\''", "'")
}

#[async_trait]
impl Shell for MockShell {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<CommandResult> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(StressError::Connection(format!("{} is closed", self.label)));
        }
        inner.log.push(command.to_string());
        Ok(inner.answer(command))
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

/// Connector that hands out a prepared [`MockShell`], or fails.
#[derive(Debug, Clone)]
pub struct MockConnector {
    shell: MockShell,
    fail_with: Option<String>,
}

impl MockConnector {
    pub fn new(shell: MockShell) -> Self {
        Self {
            shell,
            fail_with: None,
        }
    }

    /// A connector whose login always fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            shell: MockShell::new("unreachable"),
            fail_with: Some(reason.to_string()),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn login(
        &self,
        _address: &str,
        _user: &str,
        _password: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn Shell>> {
        match &self.fail_with {
            Some(reason) => Err(StressError::Connection(reason.clone())),
            None => Ok(Box::new(self.shell.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::shell_quote;

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_sequence_then_repeat_last() {
        let mut shell = MockShell::new("peer");
        shell.on_sequence(
            "pingum",
            vec![CommandResult::failed("fail", 1), CommandResult::ok("All networks ping Ok")],
        );
        assert_eq!(shell.run("pingum", T).await.unwrap().exit_code, 1);
        assert!(shell.run("pingum", T).await.unwrap().success());
        assert!(shell.run("pingum", T).await.unwrap().success());
        assert_eq!(shell.count("pingum"), 3);
    }

    #[tokio::test]
    async fn test_echo_write_then_cat_round_trips_quotes() {
        let mut shell = MockShell::new("peer");
        let cmd = format!("echo {} > /etc/hosts", shell_quote("peer's 10.0.0.2"));
        shell.run_ok(&cmd, T).await.unwrap();
        let res = shell.run_ok("cat /etc/hosts", T).await.unwrap();
        assert_eq!(res.lines, vec!["peer's 10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_missing_file_and_size_check() {
        let mut shell = MockShell::new("peer");
        assert!(!shell.run("test -s /tmp/htxerr", T).await.unwrap().success());
        shell.put_file("/tmp/htxerr", "boom\n");
        assert!(shell.run("test -s /tmp/htxerr", T).await.unwrap().success());
        let ls = shell.run("ls /nope", T).await.unwrap();
        assert!(ls.contains("No such file or directory"));
    }

    #[tokio::test]
    async fn test_closed_shell_refuses_commands() {
        let mut shell = MockShell::new("peer");
        shell.close().await.unwrap();
        assert!(matches!(
            shell.run("hostname", T).await,
            Err(StressError::Connection(_))
        ));
    }
}
