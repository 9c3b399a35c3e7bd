//! Command-line front end for the xcrunner simulator control core.
//!
//! Each subcommand maps to one core operation, which makes it handy for
//! checking by hand what the test runner would see.
//!
//! # Usage
//!
//! ```bash
//! # Installed and running apps on the booted simulator
//! xcrunner apps
//! xcrunner running --format json
//!
//! # Is the app up? Wait for it with the configured poll policy
//! xcrunner alive com.example.shop
//! xcrunner alive com.example.shop --wait
//!
//! # Route simulator traffic through a local proxy, then undo it
//! xcrunner proxy enable 127.0.0.1 8080
//! xcrunner proxy disable
//!
//! # Launch a pre-built XCTest runner in the background
//! xcrunner run-xctest build/Runner.xctestrun --destination <udid>
//!
//! # Target a specific simulator
//! xcrunner -d A1B2C3D4-E5F6-7890-ABCD-EF1234567890 screenshot shot.png
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xcrunner_core::config::RunnerConfig;
use xcrunner_core::logs::{self, LogRetention};
use xcrunner_core::proxy::{ProxyController, ProxyError};
use xcrunner_core::simctl::{Simctl, SimctlError};

/// Drive iOS Simulator control processes for XCTest runs.
#[derive(Parser)]
#[command(name = "xcrunner")]
#[command(about = "Query and control the iOS Simulator processes used by XCTest runs")]
#[command(version)]
struct Cli {
    /// Simulator UDID, or "booted" (defaults to the config file value)
    #[arg(short, long, env = "XCRUNNER_DEVICE")]
    device: Option<String>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Write diagnostics to xcrunner.log in the log root instead of stderr
    #[arg(long)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List bundle identifiers installed on the simulator
    Apps,

    /// List running launchd jobs and their pids
    Running,

    /// Check whether an app is running (exit code 1 if not)
    Alive {
        /// Bundle identifier of the app
        bundle_id: String,
        /// Poll until the app appears or the timeout elapses
        #[arg(short, long)]
        wait: bool,
        /// Poll timeout in milliseconds
        #[arg(short = 'o', long, env = "XCRUNNER_ALIVE_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Print the pid of a running app
    Pid {
        /// Bundle identifier of the app
        bundle_id: String,
    },

    /// Uninstall an app from the simulator
    Uninstall {
        /// Bundle identifier of the app
        bundle_id: String,
    },

    /// Capture a PNG screenshot of the simulator screen
    Screenshot {
        /// Where to write the image
        path: PathBuf,
    },

    /// Toggle the host web proxy
    Proxy {
        #[command(subcommand)]
        action: ProxyAction,
    },

    /// Launch a pre-built XCTest runner in the background
    RunXctest {
        /// Path to the .xctestrun file
        xctestrun: PathBuf,
        /// UDID of the destination simulator
        #[arg(long)]
        destination: String,
    },

    /// Print the runner log directory, rotating old logs on first use
    LogDir,
}

#[derive(Subcommand)]
enum ProxyAction {
    /// Point the web and secure web proxies at HOST:PORT
    Enable {
        /// Proxy host
        host: String,
        /// Proxy port
        port: u16,
        /// Network service to configure
        #[arg(long, env = "XCRUNNER_NETWORK_SERVICE")]
        service: Option<String>,
    },
    /// Turn the web and secure web proxies off
    Disable {
        /// Network service to configure
        #[arg(long, env = "XCRUNNER_NETWORK_SERVICE")]
        service: Option<String>,
    },
}

#[derive(Debug)]
enum CliError {
    Failed(String),
    Tool(String),
    Parse(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Failed(_) => ExitCode::from(1),
            CliError::Tool(_) => ExitCode::from(2),
            CliError::Parse(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Failed(msg) => write!(f, "{}", msg),
            CliError::Tool(msg) => write!(f, "Tool error: {}", msg),
            CliError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl From<SimctlError> for CliError {
    fn from(e: SimctlError) -> Self {
        match e {
            SimctlError::JsonParse(_) => CliError::Parse(e.to_string()),
            SimctlError::CommandFailed(_) => CliError::Failed(e.to_string()),
            _ => CliError::Tool(e.to_string()),
        }
    }
}

impl From<ProxyError> for CliError {
    fn from(e: ProxyError) -> Self {
        let mut msg = e.to_string();
        if e.is_partial() {
            let applied: Vec<String> = e.completed().iter().map(|s| s.to_string()).collect();
            msg.push_str(&format!(" (already applied: {})", applied.join(", ")));
        }
        match e {
            ProxyError::Launch { .. } => CliError::Tool(msg),
            ProxyError::StepFailed { .. } => CliError::Failed(msg),
        }
    }
}

fn init_logging(log_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let log_root = RunnerConfig::default()
        .retention()
        .ok()
        .map(|retention: LogRetention| retention.root().to_path_buf());

    match log_root.filter(|_| log_file) {
        Some(root) if std::fs::create_dir_all(&root).is_ok() => {
            let file_appender = tracing_appender::rolling::never(&root, "xcrunner.log");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file_appender)
                .with_ansi(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = RunnerConfig::load();
    if let Some(device) = &cli.device {
        config.device = device.clone();
    }
    debug!(device = %config.device, "loaded configuration");
    let json = cli.format == OutputFormat::Json;

    match cli.command {
        Command::Apps => {
            let apps = Simctl::system().with_config(&config).list_installed_apps()?;
            if json {
                print_json(serde_json::Value::from(apps.into_iter().collect::<Vec<_>>()))?;
            } else {
                for app in &apps {
                    println!("{}", app);
                }
            }
        }

        Command::Running => {
            let apps = Simctl::system().with_config(&config).running_apps()?;
            let mut rows: Vec<_> = apps.into_iter().collect();
            rows.sort();
            if json {
                let map: serde_json::Map<String, serde_json::Value> = rows
                    .into_iter()
                    .map(|(id, pid)| (id, pid.map_or(serde_json::Value::Null, Into::into)))
                    .collect();
                print_json(serde_json::Value::Object(map))?;
            } else {
                for (id, pid) in rows {
                    let pid = pid.map_or_else(|| "-".to_string(), |p| p.to_string());
                    println!("{:>7}  {}", pid, id);
                }
            }
        }

        Command::Alive {
            bundle_id,
            wait,
            timeout,
        } => {
            if let Some(ms) = timeout {
                config.alive_timeout_ms = ms;
            }
            let simctl = Simctl::system().with_config(&config);
            let alive = if wait {
                simctl.ensure_app_alive_async(&bundle_id).await?
            } else {
                simctl.is_app_alive(&bundle_id)?
            };
            if json {
                print_json(serde_json::json!({ "bundle_id": bundle_id, "alive": alive }))?;
            } else {
                println!("{}", if alive { "alive" } else { "not running" });
            }
            if !alive {
                return Err(CliError::Failed(format!("{} is not running", bundle_id)));
            }
        }

        Command::Pid { bundle_id } => {
            match Simctl::system().with_config(&config).pid_for_app(&bundle_id)? {
                Some(pid) => println!("{}", pid),
                None => return Err(CliError::Failed(format!("no pid for {}", bundle_id))),
            }
        }

        Command::Uninstall { bundle_id } => {
            if !Simctl::system().with_config(&config).uninstall(&bundle_id)? {
                return Err(CliError::Failed(format!("simctl could not uninstall {}", bundle_id)));
            }
        }

        Command::Screenshot { path } => {
            Simctl::system().with_config(&config).screenshot(&path)?;
            eprintln!("Wrote {}", path.display());
        }

        Command::Proxy { action } => match action {
            ProxyAction::Enable { host, port, service } => {
                let service = service.unwrap_or_else(|| config.network_service.clone());
                ProxyController::system(service).enable(&host, port)?;
            }
            ProxyAction::Disable { service } => {
                let service = service.unwrap_or_else(|| config.network_service.clone());
                ProxyController::system(service).disable()?;
            }
        },

        Command::RunXctest {
            xctestrun,
            destination,
        } => {
            let process = Simctl::system()
                .with_config(&config)
                .run_xctest_without_build(&destination, &xctestrun)?;
            if json {
                print_json(serde_json::json!({
                    "pid": process.pid(),
                    "log": process.output_path().display().to_string(),
                }))?;
            } else {
                println!("{} {}", process.pid(), process.output_path().display());
            }
        }

        Command::LogDir => {
            let retention = config
                .retention()
                .map_err(|e| CliError::Tool(e.to_string()))?;
            let dir = logs::init_log_directory(&retention)
                .map_err(|e| CliError::Tool(e.to_string()))?;
            println!("{}", dir.display());
        }
    }

    Ok(())
}

fn print_json(value: serde_json::Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(&value).map_err(|e| CliError::Parse(e.to_string()))?;
    println!("{}", text);
    Ok(())
}
