//! webdial-echo - echo server and pipe client for webdial.
//!
//! `serve` mounts a webdial endpoint and echoes every byte it receives.
//! `connect` dials an endpoint and copies stdin to it and it to stdout.

mod pipe;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use webdial::{ServerConfig, Transport};

#[derive(Parser, Debug)]
#[command(name = "webdial-echo")]
#[command(about = "Echo server and pipe client for webdial")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an echo endpoint
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Path the endpoint is mounted at
        #[arg(long, default_value = "/wd")]
        prefix: String,

        /// Directory served for every other path
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Refuse WebSocket upgrades, SSE only
        #[arg(long)]
        no_websocket: bool,

        /// Seconds between SSE heartbeats
        #[arg(long)]
        heartbeat_secs: Option<u64>,
    },

    /// Connect to an endpoint and pipe stdin/stdout through it
    Connect {
        /// Base URL of the endpoint
        url: String,

        /// Force a transport (ws or sse)
        #[arg(short, long)]
        transport: Option<Transport>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries data and the endpoint URL
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            port,
            host,
            prefix,
            static_dir,
            no_websocket,
            heartbeat_secs,
        } => {
            let mut config = ServerConfig::new().with_websocket(!no_websocket);
            if let Some(secs) = heartbeat_secs {
                config = config.with_heartbeat_interval(Duration::from_secs(secs.max(1)));
            }

            let echo = server::start_server(config, &host, port, &prefix, static_dir).await?;

            // Intentional stdout for launchers and tests
            println!("WEBDIAL_URL={}", echo.url);

            info!("Echo server running at {}", echo.url);

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            echo.server.close().await?;
        }
        Command::Connect { url, transport } => {
            pipe::run(&url, transport).await?;
        }
    }

    Ok(())
}
