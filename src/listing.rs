//! Multi-node guest listing.
//!
//! One task per node runs the combined `qm list` + `pct list` session. The
//! collector merges results into a `Report` ordered by node identifier and
//! guest ID, independent of completion order. Best-effort mode records
//! per-node failures in the report; strict mode aborts the remaining tasks
//! on the first failure and returns that node's error unchanged.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{EXIT_PARTIAL, VmctlError};
use crate::executor::Vmctl;
use crate::registry::{GuestKind, Node};
use crate::remote::{CommandSpec, LIST_SEPARATOR};

const UNKNOWN_STATUS: &str = "unknown";

// ── table parsing ────────────────────────────────────────

/// One row of a `qm list` / `pct list` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedGuest {
    pub id: u32,
    pub name: String,
    pub status: String,
}

/// Parse a Proxmox listing table, locating columns by header name.
///
/// Rows missing the ID or status column, or whose ID is not numeric, are
/// skipped. A table without ID, name, and status columns yields nothing.
pub fn parse_guest_table(output: &str) -> Vec<ListedGuest> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<String> = header.split_whitespace().map(str::to_uppercase).collect();
    let find = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|c| columns.iter().position(|col| col == c))
    };
    let (Some(id_idx), Some(name_idx), Some(status_idx)) = (
        find(&["VMID", "CTID", "ID"]),
        find(&["NAME"]),
        find(&["STATUS", "STATE"]),
    ) else {
        return Vec::new();
    };
    // `pct list` leaves the Lock column blank, so a trailing NAME column is
    // taken from the last token rather than by position.
    let name_is_last = name_idx + 1 == columns.len();
    let max_idx = id_idx.max(status_idx);

    lines
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() <= max_idx {
                return None;
            }
            let id = parts[id_idx].parse().ok()?;
            let name = if name_is_last {
                parts.last()
            } else {
                parts.get(name_idx)
            };
            Some(ListedGuest {
                id,
                name: name.copied().unwrap_or_default().to_string(),
                status: parts[status_idx].to_string(),
            })
        })
        .collect()
}

/// Split the combined session output into the `qm list` and `pct list` parts.
pub fn split_listing(stdout: &str) -> (&str, &str) {
    match stdout.split_once(LIST_SEPARATOR) {
        Some((qm, pct)) => (qm, pct),
        None => (stdout, ""),
    }
}

/// Extract the value of a `status: <value>` line from `pct status` output.
pub fn parse_pct_status(output: &str) -> Option<String> {
    output.lines().map(str::trim).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !key.trim().eq_ignore_ascii_case("status") {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn status_map(table: &str) -> HashMap<u32, String> {
    parse_guest_table(table)
        .into_iter()
        .map(|g| (g.id, g.status))
        .collect()
}

// ── report ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestRow {
    pub id: u32,
    pub name: String,
    pub status: String,
    pub kind: GuestKind,
}

/// A guest whose status could not be determined on an otherwise reachable
/// node. Its row stays in the report as `unknown`.
#[derive(Debug)]
pub struct GuestFailure {
    pub guest: String,
    pub error: VmctlError,
}

#[derive(Debug)]
pub struct NodeReport {
    pub node: String,
    pub host: String,
    pub port: u16,
    pub guests: Vec<GuestRow>,
    pub guest_errors: Vec<GuestFailure>,
    pub error: Option<VmctlError>,
}

impl NodeReport {
    fn succeeded(node: &Node, listing: NodeListing) -> Self {
        Self {
            node: node.name.clone(),
            host: node.host.clone(),
            port: node.port,
            guests: listing.guests,
            guest_errors: listing.guest_errors,
            error: None,
        }
    }

    fn failed(node: &Node, error: VmctlError) -> Self {
        Self {
            node: node.name.clone(),
            host: node.host.clone(),
            port: node.port,
            guests: Vec::new(),
            guest_errors: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Default)]
pub struct Report {
    /// Ordered by node identifier; guests within a node by ID.
    pub nodes: Vec<NodeReport>,
}

impl Report {
    pub fn succeeded(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| !n.is_failed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.is_failed())
    }

    /// Per-guest failures on nodes that otherwise answered.
    pub fn guest_failures(&self) -> impl Iterator<Item = (&NodeReport, &GuestFailure)> {
        self.nodes
            .iter()
            .flat_map(|n| n.guest_errors.iter().map(move |g| (n, g)))
    }

    /// 0 when every node and guest answered, the partial-success status
    /// otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed().next().is_some() || self.guest_failures().next().is_some() {
            EXIT_PARTIAL
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Running,
    Stopped,
}

impl StatusFilter {
    fn matches(self, status: &str) -> bool {
        match self {
            StatusFilter::Running => status.eq_ignore_ascii_case("running"),
            StatusFilter::Stopped => status.eq_ignore_ascii_case("stopped"),
        }
    }
}

/// Applied to the merged report; never changes which nodes are contacted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilters {
    pub node: Option<String>,
    pub status: Option<StatusFilter>,
}

impl ListFilters {
    fn apply(&self, report: &mut Report) {
        if let Some(node) = &self.node {
            report.nodes.retain(|n| &n.node == node);
        }
        if let Some(status) = self.status {
            for node in &mut report.nodes {
                node.guests.retain(|g| status.matches(&g.status));
            }
        }
    }
}

// ── aggregation ──────────────────────────────────────────

impl Vmctl {
    /// Query every configured node concurrently and merge the results.
    pub async fn list_all(&self, filters: &ListFilters, strict: bool) -> Result<Report, VmctlError> {
        if let Some(node) = &filters.node {
            self.registry.node(node)?;
        }

        let mut tasks = JoinSet::new();
        for node in self.registry.nodes() {
            let vmctl = self.clone();
            let node = Arc::clone(node);
            tasks.spawn(async move {
                let result = vmctl.list_node(&node, strict).await;
                (node, result)
            });
        }
        let total = tasks.len();

        let mut merged: BTreeMap<String, NodeReport> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (node, result) = match joined {
                Ok(done) => done,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    tracing::debug!("listing task cancelled: {e}");
                    continue;
                }
            };
            match result {
                Ok(listing) => {
                    tracing::debug!(node = %node.name, guests = listing.guests.len(), "node listed");
                    merged.insert(node.name.clone(), NodeReport::succeeded(&node, listing));
                }
                Err(e) if strict => {
                    tracing::debug!(node = %node.name, "strict listing aborted: {e}");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    // A prompt already on screen keeps the terminal in raw
                    // mode until it returns.
                    self.prompt.settle().await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(node = %node.name, "listing failed: {e}");
                    merged.insert(node.name.clone(), NodeReport::failed(&node, e));
                }
            }
        }

        let mut report = Report {
            nodes: merged.into_values().collect(),
        };
        let failed = report.failed().count();
        if total > 0 && failed == total {
            filters.apply(&mut report);
            return Err(VmctlError::PartialList {
                failed,
                total,
                report: Box::new(report),
            });
        }
        filters.apply(&mut report);
        Ok(report)
    }

    /// Status of every configured guest on `node`, ordered by ID.
    ///
    /// A failed `pct status` lookup fails the node in strict mode; otherwise
    /// the guest stays `unknown` and the error is recorded against it.
    async fn list_node(&self, node: &Arc<Node>, strict: bool) -> Result<NodeListing, VmctlError> {
        let listing = self.execute(node, &CommandSpec::List, None).await?;
        let (qm, pct) = split_listing(&listing.stdout);
        let vm_status = status_map(qm);
        let ct_status = status_map(pct);

        let mut rows = Vec::new();
        let mut guest_errors = Vec::new();
        for guest in self.registry.guests_on(&node.name) {
            let listed = match guest.kind {
                GuestKind::Vm => vm_status.get(&guest.id),
                GuestKind::Lxc => ct_status.get(&guest.id),
            };
            let mut status = listed
                .cloned()
                .unwrap_or_else(|| UNKNOWN_STATUS.to_string());

            if guest.kind == GuestKind::Lxc && status.eq_ignore_ascii_case(UNKNOWN_STATUS) {
                let spec = CommandSpec::ContainerStatus { id: guest.id };
                match self.execute(node, &spec, Some(guest)).await {
                    Ok(result) => {
                        if let Some(found) = parse_pct_status(&result.stdout) {
                            status = found;
                        }
                    }
                    Err(e) if strict => return Err(e),
                    Err(e) => {
                        tracing::debug!(node = %node.name, guest = %guest.name, "pct status failed: {e}");
                        guest_errors.push(GuestFailure {
                            guest: guest.name.clone(),
                            error: e,
                        });
                    }
                }
            }

            rows.push(GuestRow {
                id: guest.id,
                name: guest.name.clone(),
                status,
                kind: guest.kind,
            });
        }
        rows.sort_by_key(|r| (r.id, r.kind));
        Ok(NodeListing {
            guests: rows,
            guest_errors,
        })
    }
}

struct NodeListing {
    guests: Vec<GuestRow>,
    guest_errors: Vec<GuestFailure>,
}
