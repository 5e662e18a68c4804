//! arcade-mcp: serve an MCP tool catalog over stdio or streamable HTTP.
//!
//! Tool catalogs normally come from an external loader; the bundled demo
//! toolkit keeps the binary useful on its own and doubles as a smoke test
//! target.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use arcade_mcp::catalog::{ToolCatalog, ToolkitBuilder};
use arcade_mcp::config::ServerSettings;
use arcade_mcp::server::McpServer;
use arcade_mcp::transport::{HttpMode, HttpTransport, StdioTransport};

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_TRANSPORT: u8 = 2;

/// MCP server runtime for Arcade tool catalogs.
#[derive(Parser, Debug)]
#[command(name = "arcade-mcp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP server.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (HTTP transports)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (HTTP transports)
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Reload on source changes (not supported by this runtime)
    #[arg(long)]
    reload: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Serve over stdio instead of HTTP
    #[arg(long)]
    local: bool,

    /// Serve the SSE HTTP variant
    #[arg(long)]
    sse: bool,

    /// Serve the streamable HTTP variant (default)
    #[arg(long)]
    stream: bool,

    /// Environment file to load before reading settings
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,
}

fn init_tracing(debug: bool, to_stderr: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

/// Demo toolkit served when no external catalog is wired in.
fn demo_catalog() -> ToolCatalog {
    let mut catalog = ToolCatalog::new();
    let result = ToolkitBuilder::new("demo")
        .tool(
            "echo",
            "Echo a message back",
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }),
        )
        .handler(|args, _ctx| async move {
            Ok(args.get("message").cloned().unwrap_or(Value::Null))
        })
        .tool(
            "add",
            "Add two integers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
        )
        .output_schema(json!({"type": "integer"}))
        .handler(|args, _ctx| async move {
            Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
        })
        .register(&mut catalog);
    if let Err(err) = result {
        tracing::error!(error = %err, "failed to register demo toolkit");
    }
    catalog
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Serve(args) = cli.command;

    if args.reload {
        eprintln!("Configuration error: --reload is not supported by this runtime");
        return ExitCode::from(EXIT_CONFIG);
    }
    if args.local && (args.sse || args.stream) {
        eprintln!("Configuration error: --local cannot be combined with --sse/--stream");
        return ExitCode::from(EXIT_CONFIG);
    }
    if args.sse && args.stream {
        eprintln!("Configuration error: choose one of --sse or --stream");
        return ExitCode::from(EXIT_CONFIG);
    }

    // Environment file before settings so ARCADE_* overrides apply.
    match &args.env_file {
        Some(path) => {
            if let Err(err) = dotenvy::from_path(path) {
                eprintln!(
                    "Configuration error: failed to load {}: {err}",
                    path.display()
                );
                return ExitCode::from(EXIT_CONFIG);
            }
        },
        None => {
            let _ = dotenvy::dotenv();
        },
    }

    // Stdio must keep stdout clean for the protocol.
    init_tracing(args.debug, args.local);

    let settings = ServerSettings::from_env();
    let server = McpServer::new(demo_catalog(), settings);

    if args.local {
        info!(version = env!("CARGO_PKG_VERSION"), "starting stdio server");
        return match StdioTransport::new(server).run().await {
            Ok(()) => ExitCode::from(EXIT_OK),
            Err(err) => {
                eprintln!("Transport error: {err}");
                ExitCode::from(EXIT_TRANSPORT)
            },
        };
    }

    let mode = if args.sse {
        HttpMode::Sse
    } else {
        HttpMode::Streamable
    };
    let addr: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!(
                "Configuration error: invalid bind address {}:{}: {err}",
                args.host, args.port
            );
            return ExitCode::from(EXIT_CONFIG);
        },
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        mode = ?mode,
        "starting HTTP server"
    );
    match HttpTransport::new(server, mode).serve(addr).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(err) => {
            eprintln!("Transport error: {err}");
            ExitCode::from(EXIT_TRANSPORT)
        },
    }
}
