//! Remote command construction.
//!
//! Everything that reaches a node is a `sudo` invocation of a Proxmox tool.
//! The sudo flags depend on the node's authentication state: `-n` while no
//! password is known, `-S -p ''` with the password piped on stdin otherwise.

use std::fmt;

use crate::registry::{Guest, GuestKind};

/// Line printed between the two sub-listings of a combined listing session.
pub const LIST_SEPARATOR: &str = "--- vmctl:pct list ---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestAction {
    Start,
    Stop,
    Shutdown,
    Reboot,
    Status,
}

impl GuestAction {
    pub fn as_str(self) -> &'static str {
        match self {
            GuestAction::Start => "start",
            GuestAction::Stop => "stop",
            GuestAction::Shutdown => "shutdown",
            GuestAction::Reboot => "reboot",
            GuestAction::Status => "status",
        }
    }
}

impl fmt::Display for GuestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Shutdown,
    Reboot,
}

impl NodeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeAction::Shutdown => "node-shutdown",
            NodeAction::Reboot => "node-reboot",
        }
    }
}

impl fmt::Display for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to run on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Guest {
        action: GuestAction,
        id: u32,
        kind: GuestKind,
    },
    /// `qm list` and `pct list` in one SSH session.
    List,
    /// `pct status <ctid>`, used when a container is missing from `pct list`.
    ContainerStatus { id: u32 },
    Node { action: NodeAction },
}

impl CommandSpec {
    pub fn for_guest(guest: &Guest, action: GuestAction) -> Self {
        CommandSpec::Guest {
            action,
            id: guest.id,
            kind: guest.kind,
        }
    }

    /// Tool named in sudo error messages.
    pub fn tool(&self) -> &'static str {
        match self {
            CommandSpec::Guest { kind, .. } => kind.tool(),
            CommandSpec::List => "qm/pct",
            CommandSpec::ContainerStatus { .. } => "pct",
            CommandSpec::Node { action } => match action {
                NodeAction::Shutdown => "shutdown",
                NodeAction::Reboot => "reboot",
            },
        }
    }

    /// Privileged invocations this spec is made of, without the sudo prefix.
    pub fn invocations(&self) -> Vec<String> {
        match self {
            CommandSpec::Guest { action, id, kind } => {
                vec![format!("{} {action} {id}", kind.tool())]
            }
            CommandSpec::List => vec!["qm list".into(), "pct list".into()],
            CommandSpec::ContainerStatus { id } => vec![format!("pct status {id}")],
            CommandSpec::Node { action } => match action {
                NodeAction::Shutdown => vec!["shutdown -h now".into()],
                NodeAction::Reboot => vec!["reboot".into()],
            },
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.invocations().join(" + "))
    }
}

/// How sudo is asked to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SudoMode {
    NonInteractive,
    Password,
}

impl SudoMode {
    fn prefix(self) -> &'static str {
        match self {
            SudoMode::NonInteractive => "sudo -n",
            SudoMode::Password => "sudo -S -p ''",
        }
    }
}

/// Build the single remote shell command line for `spec`.
///
/// Sub-commands are chained with `&&` so the session exits with the status
/// of the first one that fails.
pub fn remote_command(spec: &CommandSpec, mode: SudoMode) -> String {
    let parts: Vec<String> = spec
        .invocations()
        .iter()
        .map(|inv| format!("{} {inv}", mode.prefix()))
        .collect();
    match parts.as_slice() {
        [first, second] => format!("{first} && echo '{LIST_SEPARATOR}' && {second}"),
        _ => parts.join(" && "),
    }
}

/// Bytes fed to the remote command's stdin.
///
/// One password line per sudo invocation: sudo reads a line only when it
/// actually prompts, so surplus lines are harmless.
pub fn stdin_for(spec: &CommandSpec, password: &str) -> String {
    format!("{password}\n").repeat(spec.invocations().len())
}

/// Outcome of one remote command that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub node: String,
    pub guest: Option<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub spec: CommandSpec,
}
