//! Operator prompts on the controlling terminal.
//!
//! Listing runs one task per node, and several of them may need a sudo
//! password at once. `PromptGate` makes them queue so only one prompt is on
//! screen at a time.

use std::fmt;
use std::sync::Arc;

use indicatif::ProgressBar;
use inquire::{Confirm, InquireError, PasswordDisplayMode};

use crate::error::VmctlError;
use crate::registry::Node;
use crate::remote::NodeAction;

/// A sudo password. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Source of sudo passwords. Implementations may block.
pub trait Prompter: Send + Sync + 'static {
    fn password(&self, node: &Node) -> Result<Password, VmctlError>;
}

fn map_inquire_err(e: InquireError) -> VmctlError {
    VmctlError::Prompt {
        message: e.to_string(),
    }
}

/// Hidden-input prompt via `inquire`, hiding the progress spinner while the
/// prompt is on screen.
#[derive(Default)]
pub struct InquirePrompter {
    progress: Option<ProgressBar>,
}

impl InquirePrompter {
    pub fn new(progress: Option<ProgressBar>) -> Self {
        Self { progress }
    }
}

impl Prompter for InquirePrompter {
    fn password(&self, node: &Node) -> Result<Password, VmctlError> {
        let message = format!("Password for sudo on node '{}' ({}):", node.name, node.host);
        let ask = || {
            inquire::Password::new(&message)
                .without_confirmation()
                .with_display_mode(PasswordDisplayMode::Hidden)
                .prompt()
                .map(Password::new)
                .map_err(map_inquire_err)
        };
        match &self.progress {
            Some(bar) => bar.suspend(ask),
            None => ask(),
        }
    }
}

/// Serializes access to a `Prompter` across concurrent tasks.
///
/// The terminal lock travels into the blocking prompt thread, so it stays
/// held until the prompt returns even if the awaiting task is aborted.
pub struct PromptGate {
    prompter: Arc<dyn Prompter>,
    terminal: Arc<tokio::sync::Mutex<()>>,
}

impl PromptGate {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            prompter,
            terminal: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub async fn password(&self, node: &Arc<Node>) -> Result<Password, VmctlError> {
        let terminal = Arc::clone(&self.terminal).lock_owned().await;
        let prompter = Arc::clone(&self.prompter);
        let node = Arc::clone(node);
        tokio::task::spawn_blocking(move || {
            let _terminal = terminal;
            prompter.password(&node)
        })
        .await
        .map_err(|e| VmctlError::Prompt {
            message: format!("prompt task failed: {e}"),
        })?
    }

    /// Wait until no prompt owns the terminal.
    pub async fn settle(&self) {
        let _terminal = self.terminal.lock().await;
    }
}

/// Ask the operator to confirm a node-wide action. Defaults to "no".
pub fn confirm_node_action(node: &Node, action: NodeAction) -> Result<bool, VmctlError> {
    let verb = match action {
        NodeAction::Shutdown => "Shut down",
        NodeAction::Reboot => "Reboot",
    };
    Confirm::new(&format!(
        "{verb} node '{}' ({})? Every guest on it is affected.",
        node.name, node.host
    ))
    .with_default(false)
    .prompt()
    .map_err(map_inquire_err)
}

#[cfg(test)]
pub mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Hands out canned passwords in order and counts how often it was asked.
    #[derive(Default)]
    pub struct ScriptedPrompter {
        answers: Mutex<VecDeque<String>>,
        delay: std::time::Duration,
        asked: AtomicUsize,
        in_prompt: AtomicUsize,
        overlapped: AtomicUsize,
    }

    impl ScriptedPrompter {
        pub fn new(answers: &[&str]) -> Arc<Self> {
            Self::slow(answers, std::time::Duration::from_millis(5))
        }

        /// Each answer takes `delay` to "type".
        pub fn slow(answers: &[&str], delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
                delay,
                ..Default::default()
            })
        }

        /// Prompts currently on screen.
        pub fn open(&self) -> usize {
            self.in_prompt.load(Ordering::SeqCst)
        }

        pub fn asked(&self) -> usize {
            self.asked.load(Ordering::SeqCst)
        }

        /// Number of times a prompt started while another was still open.
        pub fn overlapped(&self) -> usize {
            self.overlapped.load(Ordering::SeqCst)
        }
    }

    impl Prompter for ScriptedPrompter {
        fn password(&self, _node: &Node) -> Result<Password, VmctlError> {
            if self.in_prompt.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            self.asked.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            let answer = self.answers.lock().unwrap().pop_front();
            self.in_prompt.fetch_sub(1, Ordering::SeqCst);
            answer.map(Password::new).ok_or_else(|| VmctlError::Prompt {
                message: "no scripted answer left".into(),
            })
        }
    }

    #[test]
    fn password_debug_is_redacted() {
        let pw = Password::new("hunter2");
        assert_eq!(format!("{pw:?}"), "Password(***)");
        assert_eq!(pw.expose(), "hunter2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gate_never_overlaps_prompts() {
        let prompter = ScriptedPrompter::new(&["a", "b", "c", "d"]);
        let gate = Arc::new(PromptGate::new(prompter.clone()));
        let node = Arc::new(crate::registry::tests::test_node("pve1"));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            let node = Arc::clone(&node);
            tasks.spawn(async move { gate.password(&node).await });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }
        assert_eq!(prompter.asked(), 4);
        assert_eq!(prompter.overlapped(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn settle_waits_for_an_abandoned_prompt() {
        let prompter = ScriptedPrompter::slow(&["a"], std::time::Duration::from_millis(200));
        let gate = Arc::new(PromptGate::new(prompter.clone()));
        let node = Arc::new(crate::registry::tests::test_node("pve1"));

        let task = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.password(&node).await })
        };
        while prompter.open() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        task.abort();
        let _ = task.await;

        gate.settle().await;
        assert_eq!(prompter.open(), 0);
        assert_eq!(prompter.asked(), 1);
    }
}
