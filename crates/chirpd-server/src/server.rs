//! Server assembly: builds the shared state from configuration, installs
//! the root ACL and allocation, and runs the accept loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use chirpd_core::acl::{self, AclConfig, AclStore};
use chirpd_core::group::NoGroups;
use chirpd_core::{AllocTracker, TicketRegistry};
use chirpd_vfs::{LocalFs, Vfs};
use tokio::net::TcpListener;
use tracing::info;

use crate::auth::{AddressAuth, Authenticator, DeclaredAuth};
use crate::config::ServerConfig;
use crate::jobs::{JobStore, MemJobStore};
use crate::session;
use crate::stats::ServerStats;

/// Everything a session needs, shared across all connections.
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub fs: Arc<dyn Vfs>,
    pub acl: Arc<AclStore>,
    pub alloc: Arc<AllocTracker>,
    pub tickets: Arc<TicketRegistry>,
    pub jobs: Arc<dyn JobStore>,
    pub stats: Arc<ServerStats>,
    pub auth: Arc<dyn Authenticator>,
}

impl ServerState {
    /// Builds the state and prepares the exported tree: the root directory
    /// exists, carries an owner ACL, and the allocation recovery scan has
    /// run.
    pub fn build(config: ServerConfig) -> Result<Arc<Self>> {
        config.validate().map_err(anyhow::Error::msg)?;
        std::fs::create_dir_all(&config.root)
            .with_context(|| format!("creating root {}", config.root.display()))?;
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(&config.root));

        let tickets = Arc::new(TicketRegistry::new());
        let default_acl = config
            .default_acl
            .as_deref()
            .map(acl::parse_entries)
            .unwrap_or_default();
        let acl = Arc::new(AclStore::new(
            Arc::clone(&fs),
            Arc::new(NoGroups),
            Arc::clone(&tickets),
            AclConfig {
                superuser: config.superuser.clone(),
                read_only: config.read_only,
                default_acl,
            },
        ));

        let owner = config.superuser.clone().unwrap_or_else(|| {
            format!(
                "unix:{}",
                std::env::var("USER").unwrap_or_else(|_| "root".to_string())
            )
        });
        acl.init_root(&owner).context("installing root acl")?;

        let alloc = Arc::new(
            AllocTracker::init(Arc::clone(&fs), config.root_quota)
                .context("allocation recovery")?,
        );

        let auth: Arc<dyn Authenticator> = if config.trust_declared_identity {
            Arc::new(DeclaredAuth)
        } else {
            Arc::new(AddressAuth)
        };

        Ok(Arc::new(Self {
            config: Arc::new(config),
            fs,
            acl,
            alloc,
            tickets,
            jobs: Arc::new(MemJobStore::new()),
            stats: Arc::new(ServerStats::new()),
            auth,
        }))
    }
}

/// The listening server.
pub struct Server {
    state: Arc<ServerState>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        Ok(Self {
            state: ServerState::build(config)?,
        })
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Binds the configured address and serves until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        let addr = self.state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(
            %addr,
            root = %self.state.config.root.display(),
            "listening"
        );
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                session::serve_connection(state, stream, peer).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
    use tokio::net::TcpStream;

    async fn start(mutate: impl FnOnce(&mut ServerConfig)) -> (TempDir, SocketAddr) {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig {
            root: dir.path().to_path_buf(),
            superuser: Some("unix:alice".to_string()),
            trust_declared_identity: true,
            ..ServerConfig::default()
        };
        mutate(&mut config);
        let server = Server::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });
        (dir, addr)
    }

    async fn connect(addr: SocketAddr, subject: &str) -> BufStream<TcpStream> {
        let mut stream = BufStream::new(TcpStream::connect(addr).await.unwrap());
        stream
            .write_all(format!("subject {subject}\n").as_bytes())
            .await
            .unwrap();
        stream.flush().await.unwrap();
        assert_eq!(read_line(&mut stream).await, "0");
        stream
    }

    async fn read_line(stream: &mut BufStream<TcpStream>) -> String {
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn send(stream: &mut BufStream<TcpStream>, line: &str) {
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_over_wire() {
        let (_dir, addr) = start(|_| {}).await;
        let mut c = connect(addr, "unix:alice").await;
        send(&mut c, "stat /").await;
        assert_eq!(read_line(&mut c).await, "0");
        assert_eq!(read_line(&mut c).await.split(' ').count(), 13);
    }

    #[tokio::test]
    async fn test_putfile_getfile_round_trip() {
        let (_dir, addr) = start(|_| {}).await;
        let mut c = connect(addr, "unix:alice").await;
        c.write_all(b"putfile /f 420 5\nhello").await.unwrap();
        c.flush().await.unwrap();
        assert_eq!(read_line(&mut c).await, "5");

        send(&mut c, "getfile /f").await;
        assert_eq!(read_line(&mut c).await, "5");
        let mut data = [0u8; 5];
        c.read_exact(&mut data).await.unwrap();
        assert_eq!(&data, b"hello");
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_session() {
        let (_dir, addr) = start(|_| {}).await;
        let mut c = connect(addr, "unix:alice").await;
        send(&mut c, "frobnicate /x").await;
        assert_eq!(read_line(&mut c).await, "-8");
        send(&mut c, "whoami 100").await;
        assert_eq!(read_line(&mut c).await, "10");
        let mut subject = [0u8; 10];
        c.read_exact(&mut subject).await.unwrap();
        assert_eq!(&subject, b"unix:alice");
    }

    #[tokio::test]
    async fn test_denied_subject_gets_not_authorized() {
        let (_dir, addr) = start(|_| {}).await;
        let mut c = connect(addr, "unix:eve").await;
        send(&mut c, "stat /anything").await;
        assert_eq!(read_line(&mut c).await, "-2");
    }

    #[tokio::test]
    async fn test_eot_ends_session() {
        let (_dir, addr) = start(|_| {}).await;
        let mut c = connect(addr, "unix:alice").await;
        c.write_all(&[0x04, b'\n']).await.unwrap();
        c.flush().await.unwrap();
        let mut line = String::new();
        assert_eq!(c.read_line(&mut line).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quota_visible_in_statfs() {
        let (_dir, addr) = start(|c| c.root_quota = 1 << 20).await;
        let mut c = connect(addr, "unix:alice").await;
        send(&mut c, "statfs /").await;
        assert_eq!(read_line(&mut c).await, "0");
        let line = read_line(&mut c).await;
        let fields: Vec<i64> = line.split(' ').map(|f| f.parse().unwrap()).collect();
        assert_eq!(fields.len(), 7);
        // blocks field reflects the allocation limit, not the disk.
        assert_eq!(fields[2] * fields[1], 1 << 20);
    }

    #[tokio::test]
    async fn test_mkdir_getdir_listing() {
        let (_dir, addr) = start(|_| {}).await;
        let mut c = connect(addr, "unix:alice").await;
        send(&mut c, "mkdir /sub 493").await;
        assert_eq!(read_line(&mut c).await, "0");
        send(&mut c, "getdir /").await;
        assert_eq!(read_line(&mut c).await, "0");
        let mut names = Vec::new();
        loop {
            let line = read_line(&mut c).await;
            if line.is_empty() {
                break;
            }
            names.push(line);
        }
        assert!(names.contains(&"sub".to_string()));
        assert!(names.contains(&".".to_string()));
        assert!(!names.iter().any(|n| n.starts_with(".__")));
    }
}
