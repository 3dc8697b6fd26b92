//! Text and JSON rendering for listings and the offline inventory.

use std::fmt::Write as _;

use facet::Facet;

use crate::listing::{GuestRow, Report};
use crate::registry::GuestRegistry;

fn pad(value: &str, width: usize) -> String {
    format!("{value:<width$}")
}

fn guest_table(rows: &[GuestRow]) -> Vec<String> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.to_string()).collect();
    let id_w = ids.iter().map(String::len).chain([2]).max().unwrap_or(2);
    let name_w = rows.iter().map(|r| r.name.len()).chain([4]).max().unwrap_or(4);
    let status_w = rows.iter().map(|r| r.status.len()).chain([6]).max().unwrap_or(6);

    let mut lines = vec![format!(
        "{} {} {} TYPE",
        pad("ID", id_w),
        pad("NAME", name_w),
        pad("STATUS", status_w)
    )];
    for (row, id) in rows.iter().zip(&ids) {
        lines.push(format!(
            "{} {} {} {}",
            pad(id, id_w),
            pad(&row.name, name_w),
            pad(&row.status, status_w),
            row.kind.label()
        ));
    }
    lines
}

/// Per-node guest tables followed by a `FAILED NODES` section if any node
/// or guest lookup failed. Nodes whose guests were all filtered out are
/// omitted.
pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    let shown: Vec<_> = report.succeeded().filter(|n| !n.guests.is_empty()).collect();

    for (idx, node) in shown.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "NODE: {}", node.node);
        for line in guest_table(&node.guests) {
            let _ = writeln!(out, "  {}", line.trim_end());
        }
    }

    let failed: Vec<_> = report.failed().collect();
    let guest_failures: Vec<_> = report.guest_failures().collect();
    if !failed.is_empty() || !guest_failures.is_empty() {
        if !shown.is_empty() {
            out.push('\n');
        }
        out.push_str("FAILED NODES\n");
        for node in &failed {
            let message = node
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            let _ = writeln!(out, "  {} ({}:{}): {message}", node.node, node.host, node.port);
        }
        for (node, failure) in &guest_failures {
            let _ = writeln!(
                out,
                "  {} ({}:{}): {}: {}",
                node.node, node.host, node.port, failure.guest, failure.error
            );
        }
        if report.succeeded().next().is_none() {
            out.push_str("No nodes reachable.\n");
        }
    }
    out
}

/// Configured guests sorted by name, without contacting any node.
pub fn render_inventory(registry: &GuestRegistry) -> String {
    let mut out = String::from("NAME\tVMID\tNODE\tTYPE\n");
    for guest in registry.guests() {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}",
            guest.name, guest.id, guest.node, guest.kind
        );
    }
    out
}

// ── JSON ─────────────────────────────────────────────────

#[derive(Facet)]
struct GuestJson {
    id: u32,
    name: String,
    status: String,
    kind: String,
}

#[derive(Facet)]
struct GuestErrorJson {
    guest: String,
    error: String,
    exit_code: i32,
}

#[derive(Facet)]
struct NodeJson {
    node: String,
    host: String,
    port: u16,
    guests: Vec<GuestJson>,
    guest_errors: Vec<GuestErrorJson>,
    error: Option<String>,
    exit_code: Option<i32>,
}

pub fn report_json(report: &Report) -> String {
    let nodes: Vec<NodeJson> = report
        .nodes
        .iter()
        .map(|n| NodeJson {
            node: n.node.clone(),
            host: n.host.clone(),
            port: n.port,
            guests: n
                .guests
                .iter()
                .map(|g| GuestJson {
                    id: g.id,
                    name: g.name.clone(),
                    status: g.status.clone(),
                    kind: g.kind.label().to_string(),
                })
                .collect(),
            guest_errors: n
                .guest_errors
                .iter()
                .map(|f| GuestErrorJson {
                    guest: f.guest.clone(),
                    error: f.error.to_string(),
                    exit_code: f.error.exit_code(),
                })
                .collect(),
            error: n.error.as_ref().map(|e| e.to_string()),
            exit_code: n.error.as_ref().map(|e| e.exit_code()),
        })
        .collect();
    facet_json::to_string(&nodes).expect("JSON serialization")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmctlError;
    use crate::listing::{GuestFailure, NodeReport};
    use crate::registry::GuestKind;

    fn row(id: u32, name: &str, status: &str, kind: GuestKind) -> GuestRow {
        GuestRow {
            id,
            name: name.into(),
            status: status.into(),
            kind,
        }
    }

    fn node(name: &str, guests: Vec<GuestRow>, error: Option<VmctlError>) -> NodeReport {
        NodeReport {
            node: name.into(),
            host: format!("{name}.lan"),
            port: 22,
            guests,
            guest_errors: Vec::new(),
            error,
        }
    }

    #[test]
    fn renders_tables_and_failures() {
        let report = Report {
            nodes: vec![
                node(
                    "pve1",
                    vec![
                        row(101, "web", "running", GuestKind::Vm),
                        row(201, "dns", "stopped", GuestKind::Lxc),
                    ],
                    None,
                ),
                node(
                    "pve2",
                    vec![],
                    Some(VmctlError::RemoteCommand {
                        node: "pve2".into(),
                        code: 2,
                        message: "boom".into(),
                    }),
                ),
            ],
        };
        let text = render_report(&report);
        assert_eq!(
            text,
            "NODE: pve1\n  ID  NAME STATUS  TYPE\n  101 web  running VM\n  201 dns  stopped LXC\n\nFAILED NODES\n  pve2 (pve2.lan:22): remote command failed on node 'pve2' (exit 2): boom\n"
        );
    }

    #[test]
    fn guest_failures_are_listed_with_failures() {
        let mut pve1 = node(
            "pve1",
            vec![
                row(5, "web", "running", GuestKind::Vm),
                row(999, "old", "unknown", GuestKind::Lxc),
            ],
            None,
        );
        pve1.guest_errors.push(GuestFailure {
            guest: "old".into(),
            error: VmctlError::RemoteCommand {
                node: "pve1".into(),
                code: 2,
                message: "no such container".into(),
            },
        });
        let report = Report { nodes: vec![pve1] };

        let text = render_report(&report);
        assert!(text.starts_with("NODE: pve1\n"));
        assert!(text.contains("\nFAILED NODES\n  pve1 (pve1.lan:22): old: remote command failed"));
        assert!(!text.contains("No nodes reachable."));

        let json = report_json(&report);
        assert!(json.contains("\"guest\":\"old\""));
    }

    #[test]
    fn all_failed_says_so() {
        let report = Report {
            nodes: vec![node(
                "pve1",
                vec![],
                Some(VmctlError::SudoAuthExhausted {
                    node: "pve1".into(),
                    host: "pve1.lan".into(),
                    attempts: 3,
                }),
            )],
        };
        assert!(render_report(&report).ends_with("No nodes reachable.\n"));
    }

    #[test]
    fn json_report_carries_errors() {
        let report = Report {
            nodes: vec![node("pve1", vec![row(7, "x", "running", GuestKind::Vm)], None)],
        };
        let json = report_json(&report);
        assert!(json.contains("\"node\":\"pve1\""));
        assert!(json.contains("\"kind\":\"VM\""));
    }

    #[test]
    fn inventory_is_sorted_by_name() {
        let registry = crate::registry::tests::test_registry(&[
            ("pve2", &[("zeta", 3, GuestKind::Vm)]),
            ("pve1", &[("alpha", 9, GuestKind::Lxc)]),
        ]);
        assert_eq!(
            render_inventory(&registry),
            "NAME\tVMID\tNODE\tTYPE\nalpha\t9\tpve1\tLXC\nzeta\t3\tpve2\tVM\n"
        );
    }
}
