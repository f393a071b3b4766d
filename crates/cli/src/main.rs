mod host;

use clap::{Parser, Subcommand};
use goose_host::backend::BackendClient;
use goose_host::LaunchRequest;

#[derive(Parser)]
#[command(name = "goose-host")]
#[command(about = "Goose host: launch and supervise local backend agent servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: GOOSE_HOST_CONFIG_PATH or ~/.goose-host/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Launch backend instances, print `port<TAB>dir<TAB>version` for each, and keep them
    /// running until Ctrl+C / SIGTERM (or until they all exit).
    Launch {
        /// Config file path (default: GOOSE_HOST_CONFIG_PATH or ~/.goose-host/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Number of instances to launch concurrently.
        #[arg(long, short = 'n', default_value_t = 1)]
        count: usize,

        /// Working directory for the instances (default from config, else home directory).
        #[arg(long, short, value_name = "DIR")]
        dir: Option<std::path::PathBuf>,

        /// Extra environment variable for the backend; repeatable.
        #[arg(long = "env", short, value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Backend executable (overrides config and GOOSE_HOST_BACKEND_BIN).
        #[arg(long, value_name = "PATH")]
        binary: Option<std::path::PathBuf>,
    },

    /// Check an already running backend: health probe and agent version.
    Status {
        /// Backend port on 127.0.0.1.
        #[arg(long, short)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("goose-host {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Launch {
            config,
            count,
            dir,
            env,
            binary,
        }) => {
            if let Err(e) = run_launch(config, count, dir, env, binary).await {
                log::error!("launch failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Status { port }) => {
            if !run_status(port).await {
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(goose_host::config::default_config_path);
    let dir = goose_host::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_launch(
    config_path: Option<std::path::PathBuf>,
    count: usize,
    dir: Option<std::path::PathBuf>,
    env: Vec<String>,
    binary: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }
    let (config, path) = goose_host::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    let env = goose_host::env::parse_assignments(&env).map_err(anyhow::Error::msg)?;

    let host = host::Host::new(&config, binary)?;
    let request = LaunchRequest {
        working_dir: dir,
        env,
    };
    host.run(count, request).await
}

/// Returns true when the backend answered its health check.
async fn run_status(port: u16) -> bool {
    let client = BackendClient::new(port);
    let ready = match client.status().await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("backend on port {} not ready: {}", port, e);
            false
        }
    };
    let version = if ready {
        client.current_version().await
    } else {
        goose_host::backend::UNKNOWN_VERSION.to_string()
    };
    println!(
        "{}",
        serde_json::json!({
            "port": port,
            "ready": ready,
            "version": version,
        })
    );
    ready
}
