//! Guest inventory built once from config and queried read-only afterwards.
//!
//! Names are unique across the whole registry (enforced by config
//! validation). Numeric IDs are only advisory-unique, so the ID index maps to
//! every guest carrying that ID and ambiguity surfaces at resolution time.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{self, Config};
use crate::error::VmctlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GuestKind {
    Vm,
    Lxc,
}

impl GuestKind {
    /// Proxmox CLI tool that manages this kind of guest.
    pub fn tool(self) -> &'static str {
        match self {
            GuestKind::Vm => "qm",
            GuestKind::Lxc => "pct",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GuestKind::Vm => "VM",
            GuestKind::Lxc => "LXC",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A hypervisor node with its SSH settings fully resolved against defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identity_file: PathBuf,
    pub identities_only: bool,
    pub ssh_options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guest {
    pub name: String,
    pub id: u32,
    pub kind: GuestKind,
    /// Name of the owning node; always present in the registry.
    pub node: String,
}

#[derive(Debug, Default)]
pub struct GuestRegistry {
    nodes: BTreeMap<String, Arc<Node>>,
    by_name: BTreeMap<String, Guest>,
    by_id: BTreeMap<u32, Vec<Guest>>,
}

impl GuestRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::default();
        for (node_name, node_cfg) in &config.nodes {
            let user = config.user_for(node_cfg);
            registry.insert_node(Node {
                name: node_name.clone(),
                host: node_cfg.host.clone(),
                port: config.port_for(node_cfg),
                user: user.name.clone(),
                identity_file: config::expand_home(&user.identity_file),
                identities_only: user.identities_only,
                ssh_options: config.ssh_options_for(node_cfg).to_vec(),
            });

            let vms = node_cfg.vms.iter().map(|(n, id)| (n, *id, GuestKind::Vm));
            let lxcs = node_cfg.lxcs.iter().map(|(n, id)| (n, *id, GuestKind::Lxc));
            for (name, id, kind) in vms.chain(lxcs) {
                registry.insert_guest(Guest {
                    name: name.clone(),
                    id,
                    kind,
                    node: node_name.clone(),
                });
            }
        }
        registry
    }

    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), Arc::new(node));
    }

    /// Add a guest. The owning node must already be registered.
    pub fn insert_guest(&mut self, guest: Guest) {
        debug_assert!(self.nodes.contains_key(&guest.node));
        let ids = self.by_id.entry(guest.id).or_default();
        ids.push(guest.clone());
        ids.sort_by(|a, b| (&a.node, &a.name).cmp(&(&b.node, &b.name)));
        self.by_name.insert(guest.name.clone(), guest);
    }

    /// Map a guest name or numeric ID to exactly one guest.
    pub fn resolve(&self, reference: &str) -> Result<&Guest, VmctlError> {
        let not_found = || VmctlError::GuestNotFound {
            reference: reference.to_string(),
        };

        if let Ok(id) = reference.parse::<u32>() {
            return match self.by_id.get(&id).map(Vec::as_slice) {
                None | Some([]) => Err(not_found()),
                Some([guest]) => Ok(guest),
                Some(many) => Err(VmctlError::AmbiguousGuest {
                    id,
                    candidates: many
                        .iter()
                        .map(|g| format!("{} ({})", g.name, g.node))
                        .collect(),
                }),
            };
        }

        self.by_name.get(reference).ok_or_else(not_found)
    }

    pub fn node(&self, name: &str) -> Result<&Arc<Node>, VmctlError> {
        self.nodes.get(name).ok_or_else(|| VmctlError::UnknownNode {
            node: name.to_string(),
        })
    }

    pub fn node_of(&self, guest: &Guest) -> Result<&Arc<Node>, VmctlError> {
        self.node(&guest.node)
    }

    /// Nodes ordered by identifier.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }

    /// All guests ordered by name.
    pub fn guests(&self) -> impl Iterator<Item = &Guest> {
        self.by_name.values()
    }

    /// Guests hosted on `node`, ordered by ID.
    pub fn guests_on(&self, node: &str) -> Vec<&Guest> {
        let mut guests: Vec<&Guest> = self.by_name.values().filter(|g| g.node == node).collect();
        guests.sort_by_key(|g| (g.id, g.kind));
        guests
    }
}
