//! CLI for netwatch: a field agent that watches Wi-Fi, reachability and latency.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::error;

#[derive(Parser)]
#[command(name = "netwatch")]
#[command(about = "netwatch — buffer network-health samples locally and ship them in windows")]
#[command(version = netwatch_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent: sample every source and deliver one window per cycle.
    /// Delivery settings come from ENDPOINT_URL, API_KEY and LOOP.
    Run {
        /// Skip the root privilege check (scans may then fail)
        #[arg(long)]
        no_root_check: bool,

        #[command(flatten)]
        settings: AgentArgs,
    },

    /// Show the stored checkpoint and what the next cycle would deliver
    Status {
        /// Data directory for the sample store
        #[arg(long, env = "NETWATCH_DATA_DIR", default_value = "/var/lib/netwatch")]
        data_dir: PathBuf,

        /// Seconds kept back from the end of the window
        #[arg(long, default_value = "5")]
        settle_secs: u64,
    },

    /// Deliver the pending window once and exit
    Flush {
        #[command(flatten)]
        settings: AgentArgs,
    },

    /// List the observation sources and whether they can run on this host
    Scan {
        /// Wireless interface to scan (default: first one found)
        #[arg(long)]
        iface: Option<String>,
    },

    /// Start the HTTP ingestion endpoint (requires METRICS_KEY)
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory for the NDJSON tables
        #[arg(long, default_value = "netwatch-tables")]
        out_dir: PathBuf,
    },
}

/// Agent settings that override their environment variables.
#[derive(Args, Debug, Default)]
struct AgentArgs {
    /// Collector URL (overrides ENDPOINT_URL)
    #[arg(long)]
    endpoint: Option<String>,

    /// Collector API key (overrides API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Loop identifier of this agent (overrides LOOP)
    #[arg(long = "loop")]
    loop_id: Option<String>,

    /// Data directory for the sample store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Wireless interface to scan (default: first one found)
    #[arg(long)]
    iface: Option<String>,
}

impl From<AgentArgs> for commands::Overrides {
    fn from(args: AgentArgs) -> Self {
        Self {
            endpoint: args.endpoint,
            api_key: args.api_key,
            loop_id: args.loop_id,
            data_dir: args.data_dir,
            iface: args.iface,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            no_root_check,
            settings,
        } => commands::run::run(!no_root_check, &settings.into()),
        Commands::Status {
            data_dir,
            settle_secs,
        } => commands::status::run(&data_dir, settle_secs),
        Commands::Flush { settings } => commands::flush::run(&settings.into()),
        Commands::Scan { iface } => commands::scan::run(iface.as_deref()),
        Commands::Serve {
            port,
            host,
            out_dir,
        } => commands::serve::run(&host, port, out_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "netwatch",
            "run",
            "--no-root-check",
            "--iface",
            "wlan1",
            "--loop",
            "loop-7",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                no_root_check,
                settings,
            } => {
                assert!(no_root_check);
                assert_eq!(settings.iface.as_deref(), Some("wlan1"));
                assert_eq!(settings.loop_id.as_deref(), Some("loop-7"));
                assert!(settings.data_dir.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["netwatch", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { port, host, .. } => {
                assert_eq!(port, 8080);
                assert_eq!(host, "127.0.0.1");
            }
            _ => panic!("expected serve"),
        }
    }
}
