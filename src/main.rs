use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wp_mcp::config::{Config, TransportMode};
use wp_mcp::gateway::{http, stdio, ServerContext};
use wp_mcp::shutdown::ShutdownCoordinator;
use wp_mcp::tools::WpTools;
use wp_mcp::wp::WpClient;

#[derive(Parser)]
#[command(name = "wp-mcp", version, about = "MCP server for the WordPress REST API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a single MCP session on stdin/stdout.
    Serve,
    /// Serve MCP over HTTP with one session per connected client.
    ServeHttp {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout belongs to the stdio transport.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wp_mcp=info,tower_http=warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // The command line overrides the environment's transport selection.
    let mode = match cli.command {
        Some(Command::Serve) => TransportMode::Stdio,
        Some(Command::ServeHttp { port }) => TransportMode::Http(port),
        None => config.mode,
    };

    let client = match WpClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build WordPress client");
            std::process::exit(1);
        }
    };
    info!(site = %config.api_url, "WordPress client ready");

    if matches!(mode, TransportMode::Http(_)) && config.api_token.is_none() {
        warn!("MCP_API_TOKEN is not set; the HTTP endpoint accepts unauthenticated requests");
    }

    let tools = Arc::new(WpTools::new(client));
    let ctx = Arc::new(ServerContext::new(tools, config.api_token.clone()));

    let coordinator = ShutdownCoordinator::new();
    let cancel = coordinator.cancel_token();
    let faults = coordinator.fault_handle();

    let server = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let result = match mode {
                TransportMode::Stdio => stdio::run(ctx, cancel).await,
                TransportMode::Http(port) => http::serve(ctx, port, cancel)
                    .await
                    .map_err(anyhow::Error::from),
            };
            if let Err(e) = &result {
                faults.report(e.to_string());
            }
            result
        })
    };

    let code = coordinator.run(ctx, server).await;
    std::process::exit(code);
}
