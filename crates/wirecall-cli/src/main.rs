//! # Wirecall CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Host the echo service
//! wirecall serve -b 0.0.0.0:7000
//!
//! # Cap each connection to 64 KiB/s in both directions
//! wirecall serve -b 0.0.0.0:7000 --read-rate 65536 --write-rate 65536
//!
//! # Call it (outputs raw JSON)
//! wirecall call tcp://127.0.0.1:7000 echo -a '["hi"]'
//! wirecall call tcp://127.0.0.1:7000 add -a '[2, 3]'
//! ```
//!
//! ## Address Format
//!
//! Remote addresses use the `tcp://host:port` form:
//! - ✅ `tcp://127.0.0.1:7000`
//! - ❌ `127.0.0.1:7000` (missing scheme)

use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use wirecall_client::{ClientConfig, ClientInvoker};
use wirecall_common::rate_limit::RateLimitConfig;
use wirecall_server::{ServerConfig, ServerInvoker};

/// Bind address used when neither `--bind` nor `WIRECALL_BIND` is given.
const DEFAULT_BIND: &str = "0.0.0.0:7000";

#[derive(FromArgs)]
/// Wirecall - pooled, correlated RPC over TCP
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for hosting the echo service.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// host the built-in echo service
struct ServeArgs {
    /// address to listen on
    ///
    /// Falls back to the WIRECALL_BIND environment variable, then to
    /// 0.0.0.0:7000.
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// maximum number of blocking methods running at once
    #[argh(option, long = "pool-workers")]
    pool_workers: Option<usize>,

    /// per-connection read cap in bytes per second
    #[argh(option, long = "read-rate")]
    read_rate: Option<u64>,

    /// per-connection write cap in bytes per second
    #[argh(option, long = "write-rate")]
    write_rate: Option<u64>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method of a remote echo service
struct CallArgs {
    /// server address, e.g. tcp://127.0.0.1:7000
    #[argh(positional)]
    address: String,

    /// method to call: echo, reverse, add or sleep_ms
    #[argh(positional)]
    method: String,

    /// method arguments as a JSON array
    #[argh(option, short = 'a', long = "args", default = "\"[]\".into()")]
    args: String,

    /// request timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "120000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for piping into other tools
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

fn server_config(args: &ServeArgs) -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Some(workers) = args.pool_workers {
        config = config.with_worker_threads(workers);
    }
    if args.read_rate.is_some() || args.write_rate.is_some() {
        config = config.with_rate_limit(RateLimitConfig::per_second(args.read_rate, args.write_rate));
    }
    config
}

fn bind_address(args: &ServeArgs) -> String {
    args.bind
        .clone()
        .or_else(|| std::env::var("WIRECALL_BIND").ok())
        .unwrap_or_else(|| DEFAULT_BIND.to_string())
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let bind = bind_address(&args);
    let invoker = ServerInvoker::new(server_config(&args));
    wirecall_cli::echo::register(&invoker);

    let addr = invoker.listen(&bind).await?;
    tracing::info!("Serving {:?} on tcp://{}", invoker.service_ids(), addr);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    invoker.stop().await;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let call_args: serde_json::Value = serde_json::from_str(&args.args)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;

    let invoker = ClientInvoker::new(
        ClientConfig::default().with_request_timeout(Duration::from_millis(args.timeout_ms)),
    );
    let result =
        wirecall_cli::call::call_echo(&invoker, &args.address, &args.method, call_args).await;
    invoker.stop().await;

    println!("{}", serde_json::to_string(&result?)?);
    Ok(())
}
