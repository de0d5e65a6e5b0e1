//! Vellum repository server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vellum_core::repository::Repository;
use vellum_server::{console, manager, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "vellum-server")]
#[command(author = "Vellum Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Multi-repository sync server for vellum", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Listen address (e.g., 0.0.0.0:7421)
        #[arg(short, long, default_value = "0.0.0.0:7421")]
        addr: String,

        /// Directory holding the served repositories
        #[arg(short, long, default_value = "./data")]
        data_root: PathBuf,

        /// Branch created when a repository is initialized lazily
        #[arg(long, default_value = "master")]
        default_branch: String,

        /// Maximum concurrent sessions
        #[arg(long, default_value_t = 32)]
        max_sessions: usize,

        /// Per-socket read/write timeout in seconds
        #[arg(long, default_value_t = 30)]
        io_timeout_secs: u64,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Initialize a repository under the data root
    Init {
        /// Repository name
        name: String,

        /// Directory holding the served repositories
        #[arg(short, long, default_value = "./data")]
        data_root: PathBuf,

        /// Initial branch name
        #[arg(long, default_value = "master")]
        default_branch: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            addr,
            data_root,
            default_branch,
            max_sessions,
            io_timeout_secs,
            debug,
        } => {
            let env_filter = if debug {
                tracing_subscriber::EnvFilter::new("debug")
            } else {
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into())
            };
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer())
                .with(env_filter)
                .init();

            let server = Arc::new(Server::new(ServerConfig {
                data_root: data_root.clone(),
                default_branch,
                max_sessions,
                io_timeout: Duration::from_secs(io_timeout_secs),
            }));

            let known = server.manager().bootstrap().await?;
            info!(
                repositories = known,
                data_root = %data_root.display(),
                "repository registry ready"
            );

            let listener = TcpListener::bind(&addr).await?;
            info!("server listening on {addr}");

            let console_task = tokio::spawn(console::run(server.clone()));
            server.run(listener).await?;
            console_task.abort();
            Ok(())
        }

        Commands::Init {
            name,
            data_root,
            default_branch,
        } => {
            manager::validate_name(&name)?;
            let path = data_root.join(&name);
            Repository::init(&path, &default_branch)?;
            println!("Initialized repository {name} at {}", path.display());
            Ok(())
        }
    }
}
