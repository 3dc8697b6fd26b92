use miette::Diagnostic;
use thiserror::Error;

use crate::listing::Report;

pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_NOT_FOUND: i32 = 3;
pub const EXIT_REMOTE: i32 = 4;
pub const EXIT_SUDO: i32 = 5;
pub const EXIT_CONFIRM: i32 = 6;
pub const EXIT_TIMEOUT: i32 = 124;

/// Why an SSH invocation never produced a usable remote result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// `ssh` itself exited with its reserved status (255) or died on a signal.
    Ssh { code: i32, message: String },
    /// The command did not finish within the per-command timeout.
    Timeout { seconds: u64 },
    /// The local `ssh` process could not be started.
    Spawn { message: String },
}

impl std::fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssh { message, .. } => f.write_str(message),
            Self::Timeout { seconds } => write!(f, "timed out after {seconds}s"),
            Self::Spawn { message } => write!(f, "failed to run ssh: {message}"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum VmctlError {
    #[error("failed to read config from {path}")]
    #[diagnostic(code(vmctl::config))]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    #[diagnostic(code(vmctl::config))]
    ConfigParse { path: String, message: String },

    #[error("no config file found (tried: {tried})")]
    #[diagnostic(
        code(vmctl::config),
        help("pass --config or create ./vmctl.yaml")
    )]
    ConfigNotFound { tried: String },

    #[error("validation error: {message}")]
    #[diagnostic(code(vmctl::config))]
    Validation { message: String },

    #[error("unknown guest: {reference}")]
    #[diagnostic(code(vmctl::guest_not_found))]
    GuestNotFound { reference: String },

    #[error("guest ID {id} is not unique: {}", candidates.join(", "))]
    #[diagnostic(
        code(vmctl::ambiguous_guest),
        help("refer to the guest by name instead")
    )]
    AmbiguousGuest {
        id: u32,
        /// `name (node)` for every colliding guest.
        candidates: Vec<String>,
    },

    #[error("unknown node: {node}")]
    #[diagnostic(code(vmctl::node_not_found))]
    UnknownNode { node: String },

    #[error("{action} of node '{node}' requires confirmation")]
    #[diagnostic(
        code(vmctl::confirmation_required),
        help("this affects every guest on the node; pass --yes to confirm")
    )]
    ConfirmationRequired { node: String, action: String },

    #[error("connection to node '{node}' ({host}) failed: {failure}")]
    #[diagnostic(code(vmctl::connection))]
    Connection {
        node: String,
        host: String,
        failure: ConnectionFailure,
    },

    #[error("sudo password is required for {tool} on node '{node}' ({host})")]
    #[diagnostic(
        code(vmctl::sudo_required),
        help("configure passwordless sudo for {tool}, or drop --no-askpass to be prompted")
    )]
    SudoAuthRequired {
        node: String,
        host: String,
        tool: String,
    },

    #[error("sudo authentication failed after {attempts} attempts on node '{node}' ({host})")]
    #[diagnostic(code(vmctl::sudo_exhausted))]
    SudoAuthExhausted {
        node: String,
        host: String,
        attempts: u8,
    },

    #[error("remote command failed on node '{node}' (exit {code}): {message}")]
    #[diagnostic(code(vmctl::remote))]
    RemoteCommand {
        node: String,
        code: i32,
        message: String,
    },

    #[error("{failed} of {total} nodes failed")]
    #[diagnostic(code(vmctl::partial_list))]
    PartialList {
        failed: usize,
        total: usize,
        report: Box<Report>,
    },

    #[error("prompt failed: {message}")]
    #[diagnostic(code(vmctl::prompt))]
    Prompt { message: String },
}

impl VmctlError {
    /// Process exit status for this error. Remote and SSH failures keep the
    /// status reported by the far side.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigLoad { .. }
            | Self::ConfigParse { .. }
            | Self::ConfigNotFound { .. }
            | Self::Validation { .. } => EXIT_CONFIG,
            Self::GuestNotFound { .. } | Self::AmbiguousGuest { .. } | Self::UnknownNode { .. } => {
                EXIT_NOT_FOUND
            }
            Self::ConfirmationRequired { .. } => EXIT_CONFIRM,
            Self::Connection { failure, .. } => match failure {
                ConnectionFailure::Ssh { code, .. } => *code,
                ConnectionFailure::Timeout { .. } => EXIT_TIMEOUT,
                ConnectionFailure::Spawn { .. } => EXIT_REMOTE,
            },
            Self::SudoAuthRequired { .. } | Self::SudoAuthExhausted { .. } => EXIT_SUDO,
            Self::RemoteCommand { code, .. } => *code,
            Self::PartialList { .. } => EXIT_REMOTE,
            Self::Prompt { .. } => EXIT_SUDO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_keep_their_status() {
        let err = VmctlError::RemoteCommand {
            node: "pve1".into(),
            code: 2,
            message: "no such VM".into(),
        };
        assert_eq!(err.exit_code(), 2);

        let err = VmctlError::Connection {
            node: "pve1".into(),
            host: "10.0.0.1".into(),
            failure: ConnectionFailure::Ssh {
                code: 255,
                message: "Connection refused".into(),
            },
        };
        assert_eq!(err.exit_code(), 255);
    }

    #[test]
    fn timeout_maps_to_timeout_status() {
        let err = VmctlError::Connection {
            node: "pve1".into(),
            host: "10.0.0.1".into(),
            failure: ConnectionFailure::Timeout { seconds: 5 },
        };
        assert_eq!(err.exit_code(), EXIT_TIMEOUT);
        assert!(err.to_string().contains("timed out after 5s"));
    }

    #[test]
    fn ambiguous_guest_lists_candidates() {
        let err = VmctlError::AmbiguousGuest {
            id: 100,
            candidates: vec!["web (pve1)".into(), "dns (pve2)".into()],
        };
        assert_eq!(err.to_string(), "guest ID 100 is not unique: web (pve1), dns (pve2)");
        assert_eq!(err.exit_code(), EXIT_NOT_FOUND);
    }
}
