//! SSH transport to hypervisor nodes.
//!
//! `Transport` is the seam between command orchestration and the network;
//! `SshTransport` drives the system `ssh` binary. Each call owns one `ssh`
//! child process, spawned with `kill_on_drop`, so a timeout or a cancelled
//! task tears the connection down with it.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;

use crate::error::ConnectionFailure;
use crate::registry::Node;

/// One remote command on one node.
#[derive(Debug, Clone)]
pub struct SshRequest {
    pub node: Arc<Node>,
    /// Shell command line executed by the remote login shell.
    pub command: String,
    /// Fed to the remote command's stdin, then closed.
    pub stdin: Option<String>,
    pub timeout: Duration,
}

/// Exit status and captured streams of a finished `ssh` process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

pub trait Transport: Send + Sync + 'static {
    /// Run `request` to completion. `Err` only when no exit status exists:
    /// spawn failure, timeout, or death by signal.
    fn run(&self, request: SshRequest) -> BoxFuture<'_, Result<RawOutput, ConnectionFailure>>;
}

#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    /// Placed before the generated `ssh` arguments.
    leading_args: Vec<String>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            leading_args: Vec::new(),
        }
    }
}

impl SshTransport {
    /// Run `program` instead of `ssh`, with `leading_args` ahead of the
    /// usual arguments.
    pub fn with_program(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }
}

/// Arguments passed to `ssh` for `node`, ending with the destination and
/// the remote command.
pub fn ssh_args(node: &Node, timeout: Duration, command: &str) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        node.port.to_string(),
        "-i".to_string(),
        node.identity_file.display().to_string(),
    ];
    if node.identities_only {
        args.extend(["-o".to_string(), "IdentitiesOnly=yes".to_string()]);
    }
    // Never let ssh itself stop to ask for anything.
    args.extend([
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", timeout.as_secs().max(1)),
    ]);
    for opt in &node.ssh_options {
        if opt.starts_with('-') {
            args.push(opt.clone());
        } else {
            args.extend(["-o".to_string(), opt.clone()]);
        }
    }
    args.push(format!("{}@{}", node.user, node.host));
    args.push(command.to_string());
    args
}

impl Transport for SshTransport {
    fn run(&self, request: SshRequest) -> BoxFuture<'_, Result<RawOutput, ConnectionFailure>> {
        Box::pin(async move {
            let SshRequest {
                node,
                command,
                stdin,
                timeout,
            } = request;

            tracing::debug!(node = %node.name, host = %node.host, %command, "running ssh");

            let mut child = tokio::process::Command::new(&self.program)
                .args(&self.leading_args)
                .args(ssh_args(&node, timeout, &command))
                .stdin(if stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| ConnectionFailure::Spawn {
                    message: e.to_string(),
                })?;

            let node_name = node.name.clone();
            let run = async move {
                if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                    // The remote side may exit before reading; that shows up in
                    // the exit status, not here.
                    if let Err(e) = pipe.write_all(input.as_bytes()).await {
                        tracing::debug!(node = %node_name, "writing ssh stdin failed: {e}");
                    }
                }
                child.wait_with_output().await
            };

            let output = match tokio::time::timeout(timeout, run).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(ConnectionFailure::Spawn {
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::debug!(node = %node.name, "ssh timed out after {timeout:?}");
                    return Err(ConnectionFailure::Timeout {
                        seconds: timeout.as_secs(),
                    });
                }
            };

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            match output.status.code() {
                Some(status) => Ok(RawOutput {
                    status,
                    stdout,
                    stderr,
                }),
                None => Err(ConnectionFailure::Ssh {
                    code: 255,
                    message: format!("ssh terminated by signal ({})", output.status),
                }),
            }
        })
    }
}
