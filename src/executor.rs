//! Per-run execution context.
//!
//! `Vmctl` bundles the read-only registry with the run's mutable state: the
//! map of per-node `AuthSession`s. It is created once by the entry point and
//! dropped at exit; nothing here outlives the process. Cloning is cheap and
//! shares the same sessions, which is how listing tasks reach them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::{AuthDeps, AuthSession};
use crate::error::VmctlError;
use crate::prompt::PromptGate;
use crate::registry::{Guest, GuestRegistry, Node};
use crate::remote::{CommandSpec, ExecutionResult, GuestAction, NodeAction};
use crate::ssh::Transport;

#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    /// Allow prompting for a sudo password.
    pub askpass: bool,
    /// Bound on each SSH invocation.
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            askpass: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Lazily created `AuthSession` per node.
#[derive(Debug, Default, Clone)]
pub struct SessionMap {
    sessions: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<AuthSession>>>>>,
}

impl SessionMap {
    pub fn session(&self, node: &Arc<Node>) -> Arc<tokio::sync::Mutex<AuthSession>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.entry(node.name.clone()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(AuthSession::new(Arc::clone(node))))
        });
        Arc::clone(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct Vmctl {
    pub(crate) registry: Arc<GuestRegistry>,
    transport: Arc<dyn Transport>,
    pub(crate) prompt: Arc<PromptGate>,
    options: ExecOptions,
    sessions: SessionMap,
}

impl Vmctl {
    pub fn new(
        registry: Arc<GuestRegistry>,
        transport: Arc<dyn Transport>,
        prompt: Arc<PromptGate>,
        options: ExecOptions,
    ) -> Self {
        Self {
            registry,
            transport,
            prompt,
            options,
            sessions: SessionMap::default(),
        }
    }

    pub fn registry(&self) -> &GuestRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    pub fn resolve(&self, reference: &str) -> Result<&Guest, VmctlError> {
        self.registry.resolve(reference)
    }

    /// Run `spec` on `node` through the node's `AuthSession`.
    pub async fn execute(
        &self,
        node: &Arc<Node>,
        spec: &CommandSpec,
        guest: Option<&Guest>,
    ) -> Result<ExecutionResult, VmctlError> {
        let session = self.sessions.session(node);
        let mut session = session.lock().await;
        let deps = AuthDeps {
            transport: self.transport.as_ref(),
            prompt: &self.prompt,
            askpass: self.options.askpass,
            timeout: self.options.timeout,
        };
        let out = session.run(&deps, spec).await?;
        Ok(ExecutionResult {
            node: node.name.clone(),
            guest: guest.map(|g| g.name.clone()),
            exit_code: out.status,
            stdout: out.stdout,
            stderr: out.stderr,
            spec: spec.clone(),
        })
    }

    pub async fn perform_guest_action(
        &self,
        guest: &Guest,
        action: GuestAction,
    ) -> Result<ExecutionResult, VmctlError> {
        let node = Arc::clone(self.registry.node_of(guest)?);
        tracing::info!(guest = %guest.name, id = guest.id, node = %node.name, %action, "guest action");
        self.execute(&node, &CommandSpec::for_guest(guest, action), Some(guest))
            .await
    }

    /// Node-wide actions only run when `confirmed`; otherwise nothing is
    /// sent to the node.
    pub async fn perform_node_action(
        &self,
        node: &str,
        action: NodeAction,
        confirmed: bool,
    ) -> Result<ExecutionResult, VmctlError> {
        let node = Arc::clone(self.registry.node(node)?);
        if !confirmed {
            return Err(VmctlError::ConfirmationRequired {
                node: node.name.clone(),
                action: action.to_string(),
            });
        }
        tracing::info!(node = %node.name, %action, "node action");
        self.execute(&node, &CommandSpec::Node { action }, None).await
    }
}
