use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use stagehand_engine::{
    Catalog, Plan, ProbeSet, ProcessToolRunner, ReportFormat, Reporter, RunContext, RunEvent, RunSettings, Runner, ToolRunner,
    catalog, load_plan_document, render_halted_line, render_step_line,
};
use stagehand_types::{EXIT_ABORTED, EXIT_SUCCESS, Environment, PlanKind, ResourceKind, parse_kind_list};
use stagehand_util::config::{Credentials, StagehandConfig, default_config_path, load_config_from_path};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod prompt;

use prompt::TerminalPrompter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();
    let code = dispatch(&matches).await?;
    std::process::exit(code);
}

/// Logs go to stderr so stdout carries only step lines and reports.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_cli() -> Command {
    Command::new("stagehand")
        .about("Provision, tear down, and inspect the ML platform with idempotent, readiness-gated steps")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("PATH")
                .action(ArgAction::Set)
                .help("Configuration file (defaults to $STAGEHAND_CONFIG_PATH or the user config directory)"),
        )
        .subcommand(plan_command("provision", "Bring a plan's resources up"))
        .subcommand(
            plan_command("teardown", "Take a plan's resources down").arg(
                Arg::new("keep")
                    .long("keep")
                    .value_name("KINDS")
                    .action(ArgAction::Set)
                    .help("Comma-separated resource kinds to leave in place, e.g. namespace,release"),
            ),
        )
        .subcommand(Command::new("status").about("Report readiness without changing anything").arg(format_arg()))
        .subcommand(Command::new("plans").about("List built-in plans"))
}

fn plan_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("plan")
                .value_name("PLAN")
                .required_unless_present("file")
                .help("Built-in plan name; see `stagehand plans`"),
        )
        .arg(
            Arg::new("environment")
                .long("environment")
                .short('e')
                .value_name("ENV")
                .value_parser(["dev", "staging", "production"])
                .default_value("dev")
                .help("Selects Helm values and replica expectations"),
        )
        .arg(
            Arg::new("non-interactive")
                .long("non-interactive")
                .action(ArgAction::SetTrue)
                .help("Never prompt; prompt policies resolve to their defaults"),
        )
        .arg(
            Arg::new("file")
                .long("file")
                .short('f')
                .value_name("PATH")
                .action(ArgAction::Set)
                .help("Run a plan document (YAML or JSON) instead of a built-in plan"),
        )
        .arg(format_arg())
}

fn format_arg() -> Arg {
    Arg::new("format")
        .long("format")
        .value_name("FORMAT")
        .value_parser(["human", "json"])
        .default_value("human")
        .help("Summary format")
}

async fn dispatch(matches: &ArgMatches) -> Result<i32> {
    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    match matches.subcommand() {
        Some(("provision", sub)) => run_plan(PlanKind::Provision, sub, &config_path).await,
        Some(("teardown", sub)) => run_plan(PlanKind::Teardown, sub, &config_path).await,
        Some(("status", sub)) => run_status(sub, &config_path).await,
        Some(("plans", _)) => {
            list_plans();
            Ok(EXIT_SUCCESS)
        }
        _ => bail!("expected a subcommand; see --help"),
    }
}

fn list_plans() {
    for entry in catalog::list() {
        let kind = match entry.kind {
            PlanKind::Provision => "provision",
            PlanKind::Teardown => "teardown",
            PlanKind::Status => "status",
        };
        println!("{kind:<10} {:<12} {}", entry.name, entry.description);
    }
}

struct Session {
    config: Arc<StagehandConfig>,
    tools: Arc<dyn ToolRunner>,
    probes: ProbeSet,
}

impl Session {
    fn open(config_path: &Path) -> Result<Self> {
        let config = load_config_from_path(config_path).with_context(|| format!("load configuration {}", config_path.display()))?;
        let config = Arc::new(config);
        let tools: Arc<dyn ToolRunner> = Arc::new(ProcessToolRunner::new(config.tools.clone(), config.timeouts.tool));
        let probes = ProbeSet::new(tools.clone(), &config)?;
        Ok(Self { config, tools, probes })
    }
}

async fn run_plan(kind: PlanKind, matches: &ArgMatches, config_path: &Path) -> Result<i32> {
    let session = Session::open(config_path)?;
    let environment: Environment = matches
        .get_one::<String>("environment")
        .map(String::as_str)
        .unwrap_or("dev")
        .parse()?;
    let format = report_format(matches)?;

    let plan = match matches.get_one::<String>("file") {
        Some(path) => {
            let plan = load_plan_document(Path::new(path), &session.probes)?;
            if plan.kind() != kind {
                warn!(plan = %plan.name(), "plan document declares a different kind than the command");
            }
            plan
        }
        None => {
            let name = matches.get_one::<String>("plan").context("a plan name or --file is required")?;
            let catalog = Catalog::new(&session.probes, &session.config, environment);
            match kind {
                PlanKind::Teardown => catalog.teardown(name)?,
                _ => catalog.provision(name)?,
            }
        }
    };
    ensure_credentials(&plan, &session.config.credentials)?;

    let keep = match kind {
        PlanKind::Teardown => keep_kinds(matches)?,
        _ => Vec::new(),
    };
    let interactive = !matches.get_flag("non-interactive") && std::io::stdin().is_terminal();
    let context = Arc::new(RunContext::new(session.config.clone(), environment, session.tools.clone()).interactive(interactive));
    let runner = Runner::new(RunSettings::from_config(&session.config))
        .prompter(Arc::new(TerminalPrompter))
        .keep(keep);
    execute(runner, &plan, context, format).await
}

async fn run_status(matches: &ArgMatches, config_path: &Path) -> Result<i32> {
    let session = Session::open(config_path)?;
    let format = report_format(matches)?;
    let plan = Catalog::new(&session.probes, &session.config, Environment::default()).status()?;
    let context = Arc::new(RunContext::new(session.config.clone(), Environment::default(), session.tools.clone()));
    execute(Runner::new(RunSettings::from_config(&session.config)), &plan, context, format).await
}

/// Run the plan while streaming step lines, then print the summary.
async fn execute(runner: Runner, plan: &Plan, context: Arc<RunContext>, format: ReportFormat) -> Result<i32> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let runner = runner.events(sender);
    let printer = tokio::spawn(print_steps(receiver, format));

    info!(plan = %plan.name(), steps = plan.step_count(), "starting");
    let report = tokio::select! {
        report = runner.execute(plan, context.clone()) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!(plan = %plan.name(), "interrupted; releasing background processes");
            context.leases.release_all().await;
            return Ok(EXIT_ABORTED);
        }
    };
    drop(runner);
    if let Err(error) = printer.await {
        warn!(%error, "step printer stopped unexpectedly");
    }

    print!("{}", Reporter::render(&report, format));
    if format == ReportFormat::Json {
        println!();
    }
    Ok(report.exit_code())
}

async fn print_steps(mut receiver: mpsc::UnboundedReceiver<RunEvent>, format: ReportFormat) {
    while let Some(event) = receiver.recv().await {
        if format != ReportFormat::Human {
            continue;
        }
        if let Some(line) = step_line(&event) {
            println!("{line}");
        }
    }
}

fn step_line(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::StepStarted { .. } => None,
        RunEvent::StepFinished(outcome) => Some(render_step_line(outcome)),
        RunEvent::Halted { cause, remaining } => Some(render_halted_line(cause, *remaining)),
    }
}

fn report_format(matches: &ArgMatches) -> Result<ReportFormat> {
    Ok(matches
        .get_one::<String>("format")
        .map(|raw| raw.parse::<ReportFormat>())
        .transpose()?
        .unwrap_or_default())
}

fn keep_kinds(matches: &ArgMatches) -> Result<Vec<ResourceKind>> {
    match matches.get_one::<String>("keep") {
        Some(raw) => Ok(parse_kind_list(raw)?),
        None => Ok(Vec::new()),
    }
}

/// Missing credentials stop the run before any step executes.
fn ensure_credentials(plan: &Plan, credentials: &Credentials) -> Result<()> {
    let missing = plan.missing_credentials(credentials);
    if missing.is_empty() {
        return Ok(());
    }
    let hints = missing
        .iter()
        .map(|name| format!("{name} (or {})", Credentials::env_key(name)))
        .collect::<Vec<_>>()
        .join(", ");
    bail!("plan '{}' needs credentials that are not configured: {hints}", plan.name())
}
