//! rntbd-cli - command-line tool for an RNTBD mock server
//!
//! One-shot commands for negotiation, document reads and raw requests,
//! plus a small load generator.

mod bench;
mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rntbd_client::{ConnectionConfig, TlsClientConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rntbd-cli")]
#[command(about = "Command-line client for the RNTBD mock server")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8009", env = "RNTBD_SERVER")]
    server: SocketAddr,

    /// User agent sent in the context request
    #[arg(long)]
    user_agent: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Print JSON instead of formatted output
    #[arg(long)]
    json: bool,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long, env = "RNTBD_TLS")]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long, env = "RNTBD_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long, env = "RNTBD_CLIENT_CERT", requires = "client_key")]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long, env = "RNTBD_CLIENT_KEY", requires = "client_cert")]
    client_key: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to server IP)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Negotiate a connection context and print it
    Negotiate,

    /// Read a document
    Read {
        /// Database name
        #[arg(short, long, default_value = "db")]
        database: String,

        /// Collection name
        #[arg(short, long, default_value = "coll")]
        collection: String,

        /// Document name
        #[arg(default_value = "1")]
        document: String,
    },

    /// Send a header-only request with raw resource and operation codes
    Request {
        /// Resource type code
        #[arg(short, long, value_parser = parse_code)]
        resource: u16,

        /// Operation type code
        #[arg(short, long, value_parser = parse_code)]
        operation: u16,
    },

    /// Issue document reads and report throughput and latency
    Bench {
        /// Total number of requests
        #[arg(short = 'n', long, default_value = "10000")]
        requests: usize,

        /// Number of concurrent connections
        #[arg(short, long, default_value = "8")]
        connections: usize,
    },
}

/// Parses a decimal or `0x`-prefixed hexadecimal code.
fn parse_code(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid code '{}': {}", s, e))
}

impl Cli {
    fn tls_config(&self) -> Option<TlsClientConfig> {
        if !(self.tls || self.ca_cert.is_some() || self.client_cert.is_some() || self.insecure) {
            return None;
        }

        let mut tls = TlsClientConfig::new();
        tls.enabled = true;
        tls.ca_cert_path = self.ca_cert.clone();
        tls.client_cert_path = self.client_cert.clone();
        tls.client_key_path = self.client_key.clone();
        tls.insecure = self.insecure;
        tls.server_name = self.server_name.clone();
        Some(tls)
    }

    fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.server)
            .with_request_timeout(Duration::from_secs(self.timeout));
        if let Some(ref user_agent) = self.user_agent {
            config = config.with_user_agent(user_agent);
        }
        if let Some(tls) = self.tls_config() {
            config = config.with_tls(tls);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.connection_config();

    let result: Result<String, Box<dyn std::error::Error>> = match cli.command {
        Commands::Bench {
            requests,
            connections,
        } => bench::run(config, requests, connections)
            .await
            .map(|report| report.render(cli.json))
            .map_err(Into::into),
        cmd => commands::execute(config, cmd, cli.json).await,
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
