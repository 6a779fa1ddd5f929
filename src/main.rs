use anyhow::Context;
use clap::{Parser, ValueEnum};
use stagehand::app::{handle_fatal_error, init_logging, AppConfig};
use stagehand::config::{load_targets, parse_kv, parse_vars, StagehandConfig};
use stagehand::dispatch::{DispatchJob, Dispatcher};
use stagehand::error::Error;
use stagehand::executor::ActionRequest;
use stagehand::render::{TeraRenderer, VariableBag};
use stagehand::subprocess::{ProcessRunner, TokioProcessRunner};
use stagehand::transport::SshTransport;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Render a template per host, stage it remotely and run an action on it
#[derive(Parser)]
#[command(name = "stagehand", version)]
struct Cli {
    /// Inventory file (YAML/JSON, or one [user@]host[:port] per line)
    #[arg(long, value_name = "FILE")]
    targets: PathBuf,

    /// Template rendered once per target
    #[arg(long, value_name = "PATH")]
    template: PathBuf,

    /// Template variables as k=v,... (may repeat; `\,` for a literal comma)
    #[arg(long, value_name = "K=V,...")]
    vars: Vec<String>,

    /// Remote action to run against the staged file
    #[arg(long)]
    action: String,

    /// Extra action arguments, shell-quoted k=v words
    #[arg(long = "args", value_name = "K=V ...")]
    action_args: Option<String>,

    /// Maximum targets in flight at once
    #[arg(short, long)]
    parallelism: Option<usize>,

    /// Retries for connection and timeout failures
    #[arg(long)]
    retries: Option<u32>,

    /// Overall deadline in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Leave staged files on the targets
    #[arg(long)]
    keep_remote_files: bool,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut StagehandConfig) -> Result<(), Error> {
        if let Some(parallelism) = self.parallelism {
            settings.dispatch.parallelism = parallelism;
        }
        if let Some(retries) = self.retries {
            settings.retry.max_retries = retries;
        }
        match self.timeout {
            Some(0) => return Err(Error::config("--timeout must be at least 1 second")),
            Some(secs) => settings.dispatch.timeout = Some(Duration::from_secs(secs)),
            None => {}
        }
        if self.keep_remote_files {
            settings.dispatch.keep_remote_files = true;
        }
        settings.validate()
    }

    fn job(&self) -> Result<DispatchJob, Error> {
        if self.action.trim().is_empty() {
            return Err(Error::config("--action must not be empty"));
        }

        let mut vars = VariableBag::new();
        for list in &self.vars {
            vars.extend(parse_vars(list)?);
        }
        let args = match &self.action_args {
            Some(words) => parse_kv(words)?,
            None => BTreeMap::new(),
        };

        Ok(DispatchJob::new(
            self.template.clone(),
            vars,
            ActionRequest::new(self.action.trim()).with_args(args),
        ))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_logging(&AppConfig::new(verbose).with_quiet(cli.quiet));

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => handle_fatal_error(e, verbose),
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut settings = match &cli.config {
        Some(path) => StagehandConfig::load(path)?,
        None => StagehandConfig::default(),
    };
    cli.apply_overrides(&mut settings)?;

    let targets = load_targets(&cli.targets)?;
    let job = cli.job()?;
    debug!("Resolved settings: {:?}", settings);

    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let transport = Arc::new(SshTransport::new(runner, settings.ssh.clone()));
    let dispatcher = Dispatcher::new(
        Arc::new(TeraRenderer::new()),
        transport,
        settings.stage.clone(),
        settings.dispatch_config(),
    );

    let report = dispatcher.dispatch(targets, job).await;

    let mut stdout = std::io::stdout().lock();
    match cli.format {
        OutputFormat::Text => report.write_text(&mut stdout),
        OutputFormat::Json => serde_json::to_writer_pretty(&mut stdout, &report)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(stdout)),
    }
    .context("Failed to write report")?;
    stdout.flush().context("Failed to write report")?;

    eprintln!("summary: {}", report.summary);
    Ok(report.exit_code())
}
