//! Per-node sudo authentication.
//!
//! Each node gets one `AuthSession` per run. The first command tries
//! `sudo -n`; if the node answers that a password is required, the operator
//! is prompted (at most `MAX_PASSWORD_ATTEMPTS` times) and the command is
//! re-run with `sudo -S`. Whatever worked is remembered for the rest of the
//! run, so a node prompts at most once per successful authentication.
//!
//! Only the "password required" and "password rejected" signals are retried.
//! Connection failures and ordinary command failures propagate immediately.

use std::sync::Arc;
use std::time::Duration;

use crate::error::VmctlError;
use crate::prompt::{Password, PromptGate};
use crate::registry::Node;
use crate::remote::{self, CommandSpec, SudoMode};
use crate::ssh::{RawOutput, SshRequest, Transport};

pub const MAX_PASSWORD_ATTEMPTS: u8 = 3;

/// Status `ssh` reserves for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// What a sudo invocation told us, classified once at the SSH boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SudoOutcome {
    Success(RawOutput),
    /// `sudo -n` refused because it would have to ask for a password.
    PasswordRequired,
    /// `sudo -S` was given a password and rejected it.
    AuthRejected,
    /// `ssh` could not reach the node or lost the connection.
    Unreachable(RawOutput),
    /// The tool ran (or sudo refused for a non-password reason) and failed.
    Failed(RawOutput),
}

fn is_password_required(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("sudo") && lower.contains("password") && lower.contains("required")
}

fn is_auth_rejected(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("sorry, try again")
        || lower.contains("incorrect password")
        || lower.contains("authentication failure")
        || lower.contains("no password was provided")
}

/// Messages `ssh` itself prints when it cannot connect or authenticate.
/// Proxmox tools also exit 255 on ordinary errors, so the status alone
/// does not identify a connection failure.
const SSH_FAILURE_SIGNALS: &[&str] = &[
    "connection refused",
    "connection closed",
    "connection timed out",
    "connection reset",
    "no route to host",
    "could not resolve",
    "permission denied (publickey",
    "host key verification failed",
    "kex_exchange_identification",
];

fn is_ssh_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.lines().any(|l| l.trim_start().starts_with("ssh:"))
        || SSH_FAILURE_SIGNALS.iter().any(|s| lower.contains(s))
}

pub fn classify(output: RawOutput) -> SudoOutcome {
    if output.status == 0 {
        return SudoOutcome::Success(output);
    }
    if output.status == SSH_FAILURE_STATUS && is_ssh_failure(&output.stderr) {
        return SudoOutcome::Unreachable(output);
    }
    let combined = output.combined();
    if is_auth_rejected(&combined) {
        SudoOutcome::AuthRejected
    } else if is_password_required(&combined) {
        SudoOutcome::PasswordRequired
    } else {
        SudoOutcome::Failed(output)
    }
}

/// Credential that last worked on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Passwordless,
    Password(Password),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Fresh,
    NonInteractiveTried,
    PasswordRequired,
    InteractiveAttempt(u8),
    Authenticated(Credential),
    Exhausted,
}

/// Collaborators an `AuthSession` needs for one command.
pub struct AuthDeps<'a> {
    pub transport: &'a dyn Transport,
    pub prompt: &'a PromptGate,
    /// Whether the operator may be asked for a password.
    pub askpass: bool,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct AuthSession {
    node: Arc<Node>,
    state: AuthState,
    attempts_used: u8,
}

impl AuthSession {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            state: AuthState::Fresh,
            attempts_used: 0,
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn attempts_used(&self) -> u8 {
        self.attempts_used
    }

    fn transition(&mut self, next: AuthState) {
        if self.state != next {
            tracing::debug!(
                node = %self.node.name,
                from = ?self.state,
                to = ?next,
                "sudo auth state"
            );
            self.state = next;
        }
    }

    /// Run `spec` on this session's node, authenticating as needed.
    /// Returns the output of the successful run.
    pub async fn run(
        &mut self,
        deps: &AuthDeps<'_>,
        spec: &CommandSpec,
    ) -> Result<RawOutput, VmctlError> {
        match self.state.clone() {
            AuthState::Exhausted => return Err(self.exhausted()),
            AuthState::PasswordRequired | AuthState::InteractiveAttempt(_) => {}
            AuthState::Authenticated(Credential::Password(password)) => {
                match self.attempt(deps, spec, Some(&password)).await? {
                    SudoOutcome::Success(out) => return Ok(out),
                    SudoOutcome::PasswordRequired | SudoOutcome::AuthRejected => {
                        tracing::debug!(node = %self.node.name, "cached sudo password no longer accepted");
                        self.transition(AuthState::PasswordRequired);
                    }
                    SudoOutcome::Unreachable(out) => return Err(self.connection_error(out)),
                    SudoOutcome::Failed(out) => return Err(self.remote_error(out)),
                }
            }
            AuthState::Fresh | AuthState::NonInteractiveTried | AuthState::Authenticated(_) => {
                if self.state == AuthState::Fresh {
                    self.transition(AuthState::NonInteractiveTried);
                }
                match self.attempt(deps, spec, None).await? {
                    SudoOutcome::Success(out) => {
                        self.transition(AuthState::Authenticated(Credential::Passwordless));
                        return Ok(out);
                    }
                    SudoOutcome::PasswordRequired | SudoOutcome::AuthRejected => {
                        self.transition(AuthState::PasswordRequired);
                    }
                    SudoOutcome::Unreachable(out) => return Err(self.connection_error(out)),
                    SudoOutcome::Failed(out) => return Err(self.remote_error(out)),
                }
            }
        }

        self.authenticate_interactively(deps, spec).await
    }

    async fn authenticate_interactively(
        &mut self,
        deps: &AuthDeps<'_>,
        spec: &CommandSpec,
    ) -> Result<RawOutput, VmctlError> {
        if !deps.askpass {
            tracing::debug!(node = %self.node.name, "sudo password required and prompting is disabled");
            return Err(VmctlError::SudoAuthRequired {
                node: self.node.name.clone(),
                host: self.node.host.clone(),
                tool: spec.tool().to_string(),
            });
        }

        while self.attempts_used < MAX_PASSWORD_ATTEMPTS {
            let password = deps.prompt.password(&self.node).await?;
            self.attempts_used += 1;
            self.transition(AuthState::InteractiveAttempt(self.attempts_used));

            match self.attempt(deps, spec, Some(&password)).await? {
                SudoOutcome::Success(out) => {
                    self.transition(AuthState::Authenticated(Credential::Password(password)));
                    return Ok(out);
                }
                SudoOutcome::PasswordRequired | SudoOutcome::AuthRejected => {
                    tracing::debug!(
                        node = %self.node.name,
                        attempt = self.attempts_used,
                        "sudo password rejected"
                    );
                }
                SudoOutcome::Unreachable(out) => return Err(self.connection_error(out)),
                SudoOutcome::Failed(out) => {
                    // sudo accepted the password; the tool itself failed.
                    self.transition(AuthState::Authenticated(Credential::Password(password)));
                    return Err(self.remote_error(out));
                }
            }
        }

        self.transition(AuthState::Exhausted);
        tracing::debug!(node = %self.node.name, "sudo authentication attempts exhausted");
        Err(self.exhausted())
    }

    async fn attempt(
        &self,
        deps: &AuthDeps<'_>,
        spec: &CommandSpec,
        password: Option<&Password>,
    ) -> Result<SudoOutcome, VmctlError> {
        let mode = match password {
            Some(_) => SudoMode::Password,
            None => SudoMode::NonInteractive,
        };
        let request = SshRequest {
            node: Arc::clone(&self.node),
            command: remote::remote_command(spec, mode),
            stdin: password.map(|p| remote::stdin_for(spec, p.expose())),
            timeout: deps.timeout,
        };
        let output = deps
            .transport
            .run(request)
            .await
            .map_err(|failure| VmctlError::Connection {
                node: self.node.name.clone(),
                host: self.node.host.clone(),
                failure,
            })?;
        Ok(classify(output))
    }

    fn exhausted(&self) -> VmctlError {
        VmctlError::SudoAuthExhausted {
            node: self.node.name.clone(),
            host: self.node.host.clone(),
            attempts: self.attempts_used,
        }
    }

    fn connection_error(&self, out: RawOutput) -> VmctlError {
        VmctlError::Connection {
            node: self.node.name.clone(),
            host: self.node.host.clone(),
            failure: crate::error::ConnectionFailure::Ssh {
                code: out.status,
                message: failure_message(&out),
            },
        }
    }

    fn remote_error(&self, out: RawOutput) -> VmctlError {
        VmctlError::RemoteCommand {
            node: self.node.name.clone(),
            code: out.status,
            message: failure_message(&out),
        }
    }
}

fn failure_message(out: &RawOutput) -> String {
    match out.combined().trim() {
        "" => "remote command failed".to_string(),
        text => text.to_string(),
    }
}
