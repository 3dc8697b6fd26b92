use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use vmctl::cli::{Cli, Command, ListArgs, NodeCommand, VmCommand};
use vmctl::config::{self, Config};
use vmctl::error::VmctlError;
use vmctl::executor::{ExecOptions, Vmctl};
use vmctl::logging;
use vmctl::output;
use vmctl::prompt::{self, InquirePrompter, PromptGate};
use vmctl::registry::GuestRegistry;
use vmctl::ssh::SshTransport;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(VmctlError::PartialList { report, .. }) => {
            print!("{}", output::render_report(&report));
            vmctl::error::EXIT_REMOTE
        }
        Err(e) => {
            let code = e.exit_code();
            eprintln!("{:?}", miette::Report::new(e));
            code
        }
    };
    std::process::exit(code);
}

fn load(cli: &Cli) -> Result<Config, VmctlError> {
    let path = config::find_config_path(cli.config.as_deref())?;
    config::load_config(&path)
}

fn interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message("querying nodes...");
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn build(cli: &Cli, config: &Config, progress: Option<ProgressBar>) -> Vmctl {
    let registry = Arc::new(GuestRegistry::from_config(config));
    let prompt = Arc::new(PromptGate::new(Arc::new(InquirePrompter::new(progress))));
    let options = ExecOptions {
        askpass: !cli.no_askpass,
        timeout: Duration::from_secs(config.defaults.timeout_s),
    };
    Vmctl::new(registry, Arc::new(SshTransport::default()), prompt, options)
}

async fn run(cli: Cli) -> Result<i32, VmctlError> {
    let config = load(&cli)?;

    if let Command::Vm {
        action: VmCommand::List,
    } = &cli.command
    {
        let registry = GuestRegistry::from_config(&config);
        print!("{}", output::render_inventory(&registry));
        return Ok(0);
    }

    if let Some((action, target)) = cli.command.guest_action() {
        let vmctl = build(&cli, &config, None);
        let guest = vmctl.resolve(target)?.clone();
        let result = vmctl.perform_guest_action(&guest, action).await?;
        print!("{}", result.stdout);
        return Ok(0);
    }

    match &cli.command {
        Command::List(args) => list(&cli, &config, args).await,
        Command::Node { action } => node_action(&cli, &config, action).await,
        _ => Ok(0),
    }
}

async fn list(cli: &Cli, config: &Config, args: &ListArgs) -> Result<i32, VmctlError> {
    let progress = (!args.json && interactive()).then(spinner);
    let vmctl = build(cli, config, progress.clone());

    let result = vmctl.list_all(&args.filters(), args.strict).await;
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    let report = match result {
        Ok(report) => report,
        Err(VmctlError::PartialList { report, .. }) if args.json => {
            println!("{}", output::report_json(&report));
            return Ok(vmctl::error::EXIT_REMOTE);
        }
        Err(e) => return Err(e),
    };

    if args.json {
        println!("{}", output::report_json(&report));
    } else {
        print!("{}", output::render_report(&report));
    }
    Ok(report.exit_code())
}

async fn node_action(
    cli: &Cli,
    config: &Config,
    command: &NodeCommand,
) -> Result<i32, VmctlError> {
    let (action, target) = command.split();
    let vmctl = build(cli, config, None);
    let node = Arc::clone(vmctl.registry().node(&target.node)?);

    let confirmed = if target.yes {
        true
    } else if interactive() && !cli.no_askpass {
        tokio::task::spawn_blocking(move || prompt::confirm_node_action(&node, action))
            .await
            .map_err(|e| VmctlError::Prompt {
                message: format!("prompt task failed: {e}"),
            })??
    } else {
        false
    };

    let result = vmctl
        .perform_node_action(&target.node, action, confirmed)
        .await?;
    print!("{}", result.stdout);
    Ok(0)
}
