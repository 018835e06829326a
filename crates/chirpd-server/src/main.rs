use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use chirpd_server::{Server, ServerConfig};

/// Chirp filesystem server.
#[derive(Parser, Debug)]
#[command(name = "chirpd", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 9094)]
    port: u16,

    /// Directory to export as the virtual root
    #[arg(short, long, env = "CHIRPD_ROOT")]
    root: PathBuf,

    /// Subject granted implicit LIST and ADMIN everywhere
    #[arg(long)]
    superuser: Option<String>,

    /// Serve reads only
    #[arg(long)]
    read_only: bool,

    /// ACL text assumed for directories that carry none
    #[arg(long)]
    default_acl: Option<String>,

    /// Bytes allocated to the root; 0 disables space accounting
    #[arg(long, default_value_t = 0)]
    root_quota: i64,

    /// Seconds a connection may idle between commands
    #[arg(long, default_value_t = 60)]
    idle_timeout: u64,

    /// Base seconds before a stalled transfer is dropped
    #[arg(long, default_value_t = 3600)]
    stall_timeout: u64,

    /// Largest buffered read or write, in bytes
    #[arg(long, default_value_t = chirpd_server::config::DEFAULT_MAX_BUFFER)]
    max_buffer: usize,

    /// Enable the job commands
    #[arg(long)]
    allow_execute: bool,

    /// Trust the subject the client declares at connect time
    #[arg(long)]
    trust_declared_identity: bool,

    /// Cap on a single job wait, in seconds
    #[arg(long, default_value_t = 300)]
    job_wait_max: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        address: args.address,
        port: args.port,
        root: args.root,
        superuser: args.superuser,
        read_only: args.read_only,
        default_acl: args.default_acl,
        root_quota: args.root_quota,
        idle_timeout_secs: args.idle_timeout,
        stall_timeout_secs: args.stall_timeout,
        max_buffer_size: args.max_buffer,
        allow_execute: args.allow_execute,
        trust_declared_identity: args.trust_declared_identity,
        job_wait_max_secs: args.job_wait_max,
    };

    Server::new(config)?.run().await
}
