//! FlashSock - A Pooled TCP Connection Core
//!
//! This is the `flashsock` echo server. It starts a listener with the default
//! length-prefixed framing and sends every message it receives straight back.

use anyhow::Context;
use flashsock::config::{
    Settings, DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ACCEPT_OPS,
    DEFAULT_MAX_CONNECTIONS,
};
use flashsock::listener::{ConnectionEvent, EventSender, SocketListener};
use flashsock::protocol::FrameProcessor;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Listen backlog
    backlog: u32,
    /// Size of each I/O buffer segment
    buffer_size: usize,
    /// Maximum concurrently admitted connections
    max_connections: usize,
    /// Number of concurrent accept workers
    max_accept_ops: usize,
    /// I/O slots; twice `max_connections` when unset
    io_slots: Option<usize>,
    /// Idle timeout in seconds
    idle_timeout: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: flashsock::DEFAULT_HOST.to_string(),
            port: flashsock::DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_accept_ops: DEFAULT_MAX_ACCEPT_OPS,
            io_slots: None,
            idle_timeout: None,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--host" | "-h" => config.host = value_of(&args, i, flag),
                "--port" | "-p" => config.port = value_of(&args, i, flag),
                "--backlog" => config.backlog = value_of(&args, i, flag),
                "--buffer-size" => config.buffer_size = value_of(&args, i, flag),
                "--max-connections" | "-c" => config.max_connections = value_of(&args, i, flag),
                "--max-accept-ops" => config.max_accept_ops = value_of(&args, i, flag),
                "--io-slots" => config.io_slots = Some(value_of(&args, i, flag)),
                "--idle-timeout" => config.idle_timeout = Some(value_of(&args, i, flag)),
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlashSock version {}", flashsock::VERSION);
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

    /// Resolves the bind address and validates the pool settings
    fn settings(&self) -> anyhow::Result<Settings> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("no address for {}", self.host))?;

        let mut builder = Settings::builder()
            .local_addr(addr)
            .backlog(self.backlog)
            .buffer_size(self.buffer_size)
            .max_connections(self.max_connections)
            .max_accept_ops(self.max_accept_ops)
            .idle_timeout(self.idle_timeout.map(Duration::from_secs));
        if let Some(slots) = self.io_slots {
            builder = builder.io_slots(slots);
        }

        Ok(builder.build()?)
    }
}

/// Parses the value following the flag at `args[i]`, exiting on error
fn value_of<T: FromStr>(args: &[String], i: usize, flag: &str) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, raw);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
FlashSock - A Pooled TCP Connection Core (echo server)

USAGE:
    flashsock [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 7070)
        --backlog <N>              Listen backlog (default: 1024)
        --buffer-size <BYTES>      I/O segment size (default: 8192)
    -c, --max-connections <N>      Concurrent connections (default: 1024)
        --max-accept-ops <N>       Concurrent accept workers (default: 4)
        --io-slots <N>             I/O slots (default: 2 x max connections)
        --idle-timeout <SECS>      Close connections silent this long
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    flashsock                                  # Start on 127.0.0.1:7070
    flashsock --port 9000 -c 10000             # 10k connections on port 9000
    flashsock --host 0.0.0.0 --idle-timeout 60 # All interfaces, 60s idle limit

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=flashsock=debug
"#
    );
}

fn print_banner(addr: &SocketAddr, settings: &Settings) {
    println!(
        r#"
FlashSock v{} - Pooled TCP Connection Core
──────────────────────────────────────────────────────────────
Echo server listening on {}
Connections: {}   I/O slots: {} x {} bytes

Use Ctrl+C to shutdown gracefully.
"#,
        flashsock::VERSION,
        addr,
        settings.max_connections(),
        settings.io_slots(),
        settings.buffer_size(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let settings = config.settings()?;

    let (events, rx) = EventSender::channel();
    let listener = SocketListener::new(settings, FrameProcessor::new(), events);
    let addr = listener.start_listen()?;

    // Print the banner
    print_banner(&addr, listener.settings());

    // Set up graceful shutdown
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    };

    tokio::select! {
        _ = echo_loop(&listener, rx) => {}
        _ = shutdown => {}
    }

    listener.dispose();

    let stats = listener.stats();
    info!(
        accepted = stats.connections_accepted.load(Ordering::Relaxed),
        received = stats.messages_received.load(Ordering::Relaxed),
        sent = stats.messages_sent.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Consumes listener events, echoing data and answering pings
async fn echo_loop(listener: &SocketListener, mut events: UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::DataReceived(conn, message) => {
                listener.post_send_with(&conn, message.opcode, &message.payload);
            }
            ConnectionEvent::Ping(conn, _) => {
                listener.pong(&conn);
            }
            other => {
                debug!(
                    conn = other.connection().id(),
                    event = other.kind(),
                    "Event"
                );
            }
        }
    }
}
