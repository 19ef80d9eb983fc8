//! Pulsebench CLI - Command-line interface
//!
//! Runs validation plans against a device console and exits with a code
//! CI pipelines can act on.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pulsebench_core::cli::{print_exit_codes, CliResult, ExitCodes};
use pulsebench_core::config::{default_config_path, BenchConfig, ConfigError};
use pulsebench_core::core::channel::{CommandChannel, CommandRequest};
use pulsebench_core::core::plan::{counter_suite, TestPlan};
use pulsebench_core::core::report::ReportGenerator;
use pulsebench_core::core::runner::{RunnerConfig, TestRunner};
use pulsebench_core::core::simulator::PulseCounter;
use pulsebench_core::core::telemetry;
use pulsebench_core::core::testcase::TestCase;
use pulsebench_core::core::transcript::Transcript;
use pulsebench_core::core::transport::{
    create_transport, list_ports, BufferedTransport, SerialConfig, Transport, TransportTrait,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pulsebench CLI
#[derive(Parser, Debug)]
#[command(
    name = "pulsebench",
    author = "Pulsebench Team",
    version,
    about = "Automated validation bench for embedded devices on a serial console",
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "PULSEBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port name (e.g., COM11, /dev/ttyUSB0), overrides the configuration
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Talk to the built-in pulse counter simulator instead of a device
    #[arg(long, global = true)]
    simulate: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a test plan and write the report
    Run {
        /// Plan file (TOML); the built-in counter suite runs when omitted
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Markdown report path
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Also write the report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write the wire transcript to this file
        #[arg(long)]
        transcript: Option<PathBuf>,
    },

    /// Send one command and print the response
    Exec {
        /// Command line to send
        command: String,

        /// Settle time (ms)
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Print the value bound to this address in the response
        #[arg(short, long)]
        address: Option<u32>,
    },

    /// List available serial ports
    Ports {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Print the exit code table
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match dispatch(&cli).await {
        Ok(result) => result,
        Err(e) => CliResult::error(ExitCodes::ERROR, format!("{e:#}")),
    };

    match (&result, result.message()) {
        (CliResult::Success(_), Some(msg)) if !cli.quiet => println!("{msg}"),
        (CliResult::Error(code, _), Some(msg)) => eprintln!("Error ({code}): {msg}"),
        _ => {}
    }
    result.to_exit_code()
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn dispatch(cli: &Cli) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
        Commands::Ports { detailed } => ports(*detailed),
        Commands::Run {
            plan,
            report,
            json,
            transcript,
        } => {
            let config = match load_config(cli) {
                Ok(config) => config,
                Err(e) => return Ok(e.into()),
            };
            run(cli, &config, plan.as_deref(), report.as_deref(), json.as_deref(), transcript.as_deref()).await
        }
        Commands::Exec {
            command,
            settle_ms,
            address,
        } => {
            let config = match load_config(cli) {
                Ok(config) => config,
                Err(e) => return Ok(e.into()),
            };
            exec(cli, &config, command, *settle_ms, *address).await
        }
    }
}

/// Load the configuration file and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<BenchConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(ConfigError::Io {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
        Some(path) => BenchConfig::load(path)?,
        None => match default_config_path() {
            Some(path) => BenchConfig::load(&path)?,
            None => BenchConfig::default(),
        },
    };

    if cli.port.is_some() || cli.baud.is_some() {
        let (port, baud) = match &config.transport {
            Transport::Serial(serial) => (serial.port.clone(), serial.baud_rate),
            Transport::Tcp(_) => (SerialConfig::default().port, SerialConfig::default().baud_rate),
        };
        config.transport = Transport::Serial(SerialConfig::new(
            cli.port.as_deref().unwrap_or(&port),
            cli.baud.unwrap_or(baud),
        ));
    }
    config.validate()?;
    Ok(config)
}

fn endpoint(cli: &Cli, config: &BenchConfig) -> Box<dyn TransportTrait> {
    if cli.simulate {
        info!(rate_hz = config.counter.rate_hz, "using simulated pulse counter");
        Box::new(PulseCounter::device(config.counter.rate_hz))
    } else {
        create_transport(config.transport.clone())
    }
}

async fn run(
    cli: &Cli,
    config: &BenchConfig,
    plan: Option<&Path>,
    report: Option<&Path>,
    json: Option<&Path>,
    transcript: Option<&Path>,
) -> anyhow::Result<CliResult> {
    let cases: Vec<Box<dyn TestCase>> = match plan.or(config.run.plan.as_deref()) {
        Some(path) => match TestPlan::load(path) {
            Ok(plan) => {
                info!(plan = %path.display(), cases = plan.cases.len(), "plan loaded");
                plan.into_cases()
            }
            Err(e) => return Ok(e.into()),
        },
        None => counter_suite(&config.counter)
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn TestCase>)
            .collect(),
    };

    let mut runner = TestRunner::new(RunnerConfig::from_config(config));
    let wire_log = transcript.map(|_| Transcript::shared());
    if let Some(log) = &wire_log {
        runner = runner.with_transcript(log.clone());
    }

    let cancel = runner.cancellation_token();
    ctrlc::set_handler(move || cancel.cancel()).context("Failed to install Ctrl-C handler")?;

    let outcome = match runner.run(endpoint(cli, config), &cases).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("cannot open endpoint: {e}");
            return Ok(e.into());
        }
    };

    let generator = ReportGenerator::new(config.report.title.clone(), config.acceptance);
    let report_path = report.unwrap_or(&config.report.path);
    generator
        .write(&outcome.report, report_path)
        .context("Failed to write report")?;
    info!(path = %report_path.display(), "report written");

    if let Some(json_path) = json.or(config.report.json_path.as_deref()) {
        generator
            .write_json(&outcome.report, json_path)
            .context("Failed to write JSON report")?;
    }
    if let (Some(path), Some(log)) = (transcript, &wire_log) {
        log.lock()
            .write_to(path)
            .with_context(|| format!("Failed to write transcript {}", path.display()))?;
    }

    let summary = &outcome.report;
    if !cli.quiet {
        println!(
            "{} tests: {} passed, {} failed, {} inconclusive ({:.1}%) - {}",
            summary.total(),
            summary.passed(),
            summary.failed(),
            summary.inconclusive(),
            summary.success_rate() * 100.0,
            generator.verdict(summary)
        );
    }
    Ok(CliResult::from_outcome(&outcome))
}

async fn exec(
    cli: &Cli,
    config: &BenchConfig,
    command: &str,
    settle_ms: Option<u64>,
    address: Option<u32>,
) -> anyhow::Result<CliResult> {
    let transport = match BufferedTransport::open(endpoint(cli, config), config.channel.poll_interval()).await {
        Ok(transport) => transport,
        Err(e) => return Ok(e.into()),
    };
    let mut channel = CommandChannel::new(transport, config.channel.line_ending);

    let settle = settle_ms.map_or(config.channel.settle(), Duration::from_millis);
    let result = channel.exchange(&CommandRequest::new(command, settle)).await;
    if let Err(e) = channel.close().await {
        warn!("closing transport failed: {e}");
    }
    let response = match result {
        Ok(response) => response,
        Err(e) => return Ok(e.into()),
    };

    if response.is_empty() {
        eprintln!("(no response within {} ms)", settle.as_millis());
    } else {
        print!("{}", response.text());
    }

    if let Some(address) = address {
        match telemetry::extract(response.text(), address) {
            Some(value) => println!("[{address}] = {value}"),
            None => {
                return Ok(CliResult::error(
                    ExitCodes::VALIDATION_FAILED,
                    format!("No value for address {address} in response"),
                ));
            }
        }
    }
    Ok(CliResult::success())
}

fn ports(detailed: bool) -> anyhow::Result<CliResult> {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return Ok(e.into()),
    };

    if ports.is_empty() {
        eprintln!("No serial ports found");
        return Ok(CliResult::success());
    }
    if detailed {
        println!("Available Serial Ports:");
        println!("{:-<60}", "");
        for port in &ports {
            println!("  {} [{:?}]", port.port_name, port.port_type);
        }
    } else {
        for port in &ports {
            println!("{}", port.port_name);
        }
    }
    Ok(CliResult::success())
}
