use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::listing::{ListFilters, StatusFilter};
use crate::remote::{GuestAction, NodeAction};

#[derive(Parser, Debug)]
#[command(name = "vmctl", about = "Control Proxmox VMs and containers over SSH")]
pub struct Cli {
    /// Path to config file (default: ./vmctl.yaml, then ~/.config/vmctl-ng/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Never prompt for a sudo password; fail instead
    #[arg(long, global = true)]
    pub no_askpass: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a guest (qm/pct start)
    Start(GuestTarget),
    /// Hard-stop a guest (qm/pct stop)
    Stop(GuestTarget),
    /// Gracefully shut down a guest (qm/pct shutdown)
    Shutdown(GuestTarget),
    /// Reboot a guest (qm/pct reboot)
    Reboot(GuestTarget),
    /// Show a guest's status (qm/pct status)
    Status(GuestTarget),

    /// List VMs and containers across nodes
    List(ListArgs),

    /// Guest inventory from config
    Vm {
        #[command(subcommand)]
        action: VmCommand,
    },

    /// Node-wide power actions
    Node {
        #[command(subcommand)]
        action: NodeCommand,
    },
}

#[derive(Args, Debug)]
pub struct GuestTarget {
    /// Guest name or numeric ID
    pub guest: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show this node
    #[arg(short, long)]
    pub node: Option<String>,

    /// Only show running guests
    #[arg(long, conflicts_with = "stopped")]
    pub running: bool,

    /// Only show stopped guests
    #[arg(long)]
    pub stopped: bool,

    /// Fail on the first unreachable node, with its exit code
    #[arg(long)]
    pub strict: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn filters(&self) -> ListFilters {
        let status = if self.running {
            Some(StatusFilter::Running)
        } else if self.stopped {
            Some(StatusFilter::Stopped)
        } else {
            None
        };
        ListFilters {
            node: self.node.clone(),
            status,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum VmCommand {
    /// List configured guests without contacting any node
    List,
}

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    /// Power off a node and every guest on it
    Shutdown(NodeTarget),
    /// Reboot a node and every guest on it
    Reboot(NodeTarget),
}

#[derive(Args, Debug)]
pub struct NodeTarget {
    /// Node identifier from config
    pub node: String,

    /// Confirm the action without asking
    #[arg(long)]
    pub yes: bool,
}

impl Command {
    /// Guest action and target, for the single-guest commands.
    pub fn guest_action(&self) -> Option<(GuestAction, &str)> {
        let (action, target) = match self {
            Command::Start(t) => (GuestAction::Start, t),
            Command::Stop(t) => (GuestAction::Stop, t),
            Command::Shutdown(t) => (GuestAction::Shutdown, t),
            Command::Reboot(t) => (GuestAction::Reboot, t),
            Command::Status(t) => (GuestAction::Status, t),
            _ => return None,
        };
        Some((action, target.guest.as_str()))
    }
}

impl NodeCommand {
    pub fn split(&self) -> (NodeAction, &NodeTarget) {
        match self {
            NodeCommand::Shutdown(t) => (NodeAction::Shutdown, t),
            NodeCommand::Reboot(t) => (NodeAction::Reboot, t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_guest_action() {
        let cli = Cli::parse_from(["vmctl", "--no-askpass", "shutdown", "web"]);
        assert!(cli.no_askpass);
        assert_eq!(cli.command.guest_action(), Some((GuestAction::Shutdown, "web")));
    }

    #[test]
    fn parse_list_filters() {
        let cli = Cli::parse_from(["vmctl", "list", "-n", "pve1", "--running", "--strict"]);
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert!(args.strict);
        assert_eq!(
            args.filters(),
            ListFilters {
                node: Some("pve1".into()),
                status: Some(StatusFilter::Running),
            }
        );
    }

    #[test]
    fn running_and_stopped_conflict() {
        assert!(Cli::try_parse_from(["vmctl", "list", "--running", "--stopped"]).is_err());
    }

    #[test]
    fn parse_node_action() {
        let cli = Cli::parse_from(["vmctl", "node", "reboot", "pve2", "--yes"]);
        let Command::Node { action } = cli.command else {
            panic!("expected node");
        };
        let (action, target) = action.split();
        assert_eq!(action, NodeAction::Reboot);
        assert_eq!(target.node, "pve2");
        assert!(target.yes);
    }
}
