//! tinyweb - An epoll Reactor Web Server
//!
//! This is the main entry point for the tinyweb server.
//! It sets up logging, the user store pool and the reactor, then waits for
//! Ctrl+C.

use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tinyweb::config::{ServerConfig, TriggerMode};
use tinyweb::protocol::HttpHandler;
use tinyweb::reactor::{Reactor, ServerHandle};
use tinyweb::storage::{StorePool, UserStore};
use tokio::signal;
use tracing::{error, info};

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--host" | "-h" => config.host = value(&args, i, flag),
            "--port" | "-p" => config.port = value(&args, i, flag),
            "--trigger-mode" | "-m" => {
                let code: u8 = value(&args, i, flag);
                config.trigger_mode = TriggerMode::from_code(code).unwrap_or_else(|e| {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                });
            }
            "--timeout-ms" | "-t" => {
                config.idle_timeout = Duration::from_millis(value(&args, i, flag))
            }
            "--threads" => config.worker_threads = value(&args, i, flag),
            "--max-conns" => config.max_connections = value(&args, i, flag),
            "--root" | "-r" => config.doc_root = value::<PathBuf>(&args, i, flag),
            "--store-pool" => config.store_pool_size = value(&args, i, flag),
            "--log-level" | "-l" => config.log.level = value(&args, i, flag),
            "--log-dir" => config.log.dir = Some(value::<PathBuf>(&args, i, flag)),
            "--log-queue" => config.log.queue_capacity = value(&args, i, flag),
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("tinyweb version {}", tinyweb::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 2;
    }

    config
}

/// Value following `args[i]`, or exit with a message.
fn value<T: FromStr>(args: &[String], i: usize, flag: &str) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value '{}' for {}", raw, flag);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
tinyweb - An epoll Reactor Web Server

USAGE:
    tinyweb [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>           Port to listen on (default: 1316)
    -m, --trigger-mode <0-3>    0 level/level, 1 edge connections,
                                2 edge listener, 3 edge/edge (default: 3)
    -t, --timeout-ms <MS>       Idle timeout, 0 disables (default: 60000)
        --threads <N>           Worker threads (default: 6)
        --max-conns <N>         Connection limit (default: 65536)
    -r, --root <DIR>            Document root (default: ./resources)
        --store-pool <N>        User store connections (default: 12)
    -l, --log-level <LEVEL>     trace, debug, info, warn, error, off (default: info)
        --log-dir <DIR>         Write rolling log files here instead of stdout
        --log-queue <N>         Async log queue size, 0 is synchronous (default: 1024)
    -v, --version               Print version information
        --help                  Print this help message

EXAMPLES:
    tinyweb                                # Start on 127.0.0.1:1316
    tinyweb --port 8080 --root ./www       # Serve ./www on port 8080
    tinyweb -m 0 --timeout-ms 0            # Level-triggered, never evict
    tinyweb --log-dir ./log --log-queue 0  # Synchronous file logging

CONNECTING:
    $ curl -v http://127.0.0.1:1316/
    $ curl -d 'username=ariz&password=secret' http://127.0.0.1:1316/register
"#
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
   __  _                              __
  / /_(_)___  __  ___      _____  ___/ /_
 / __/ / __ \/ / / / | /| / / _ \/ __  /
/ /_/ / / / / /_/ /| |/ |/ /  __/ /_/ /
\__/_/_/ /_/\__, / |__/|__/\___/\__,_/
           /____/

tinyweb v{} - epoll Reactor Web Server
──────────────────────────────────────────────────────────────
Server starting on {}
Trigger mode {}, {} workers, document root {}

Use Ctrl+C to shutdown gracefully.
"#,
        tinyweb::VERSION,
        config.bind_address(),
        config.trigger_mode.code(),
        config.worker_threads,
        config.doc_root.display(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging; the guard flushes log files on exit
    let _log = tinyweb::logging::init(&config.log).context("failed to set up logging")?;

    config.validate(true).context("invalid configuration")?;

    // Print the banner
    print_banner(&config);

    // User store behind a fixed-size connection pool
    let store = Arc::new(UserStore::new());
    let store_pool = Arc::new(StorePool::new(store, config.store_pool_size));
    info!(size = config.store_pool_size, "User store pool initialized");

    let handler = HttpHandler::new(config.doc_root.clone()).with_store(Arc::clone(&store_pool));

    let bind_address = config.bind_address();
    let mut server = Reactor::bind(config, handler)
        .with_context(|| format!("failed to start server on {}", bind_address))?
        .spawn()
        .context("failed to start reactor thread")?;
    info!("Listening on {}", server.local_addr());

    // Wait for Ctrl+C, or for the reactor to die on its own
    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping server...");
        }
        _ = reactor_exited(&server) => {
            error!("Reactor stopped unexpectedly");
        }
    }

    let result = server.shutdown();
    store_pool.close();

    let stats = server.stats().snapshot();
    info!(
        accepted = stats.connections_accepted,
        rejected = stats.connections_rejected,
        requests = stats.requests_processed,
        timeouts = stats.idle_timeouts,
        "Server shutdown complete"
    );

    result.context("reactor stopped with an error")
}

async fn reactor_exited(server: &ServerHandle) {
    while server.is_running() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
