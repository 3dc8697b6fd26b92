//! Scripted in-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::ConnectionFailure;
use crate::ssh::{RawOutput, SshRequest, Transport};

#[derive(Debug, Clone)]
pub enum Reply {
    Exit(RawOutput),
    Fail(ConnectionFailure),
    /// Wait, then answer with the inner reply.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn exit(status: i32, stdout: &str, stderr: &str) -> Self {
        Reply::Exit(RawOutput {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        })
    }

    pub fn after(self, delay: Duration) -> Self {
        Reply::Delayed(delay, Box::new(self))
    }
}

/// Answers each node's requests from a per-node queue and records them.
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<HashMap<String, Vec<SshRequest>>>,
}

impl FakeTransport {
    pub fn push(&self, node: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self, node: &str) -> Vec<SshRequest> {
        self.requests
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    pub fn commands(&self, node: &str) -> Vec<String> {
        self.requests(node).into_iter().map(|r| r.command).collect()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl Transport for FakeTransport {
    fn run(&self, request: SshRequest) -> BoxFuture<'_, Result<RawOutput, ConnectionFailure>> {
        let node = request.node.name.clone();
        self.requests
            .lock()
            .unwrap()
            .entry(node.clone())
            .or_default()
            .push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&node)
            .and_then(VecDeque::pop_front);

        Box::pin(async move {
            let mut reply = reply.ok_or_else(|| ConnectionFailure::Spawn {
                message: format!("no scripted reply for node '{node}'"),
            })?;
            loop {
                match reply {
                    Reply::Exit(out) => return Ok(out),
                    Reply::Fail(failure) => return Err(failure),
                    Reply::Delayed(delay, inner) => {
                        tokio::time::sleep(delay).await;
                        reply = *inner;
                    }
                }
            }
        })
    }
}
