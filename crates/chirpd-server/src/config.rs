//! Server configuration. Everything the original kept in process-wide
//! globals lives here, fixed at startup and shared by reference.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default cap on a single buffered transfer.
pub const DEFAULT_MAX_BUFFER: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds.
    pub address: String,
    pub port: u16,
    /// Directory exported as the virtual root.
    pub root: PathBuf,
    /// Subject that implicitly holds LIST and ADMIN everywhere.
    pub superuser: Option<String>,
    /// Serve reads only; every resolved grant is masked to READ and LIST.
    pub read_only: bool,
    /// ACL text assumed for directories that carry none.
    pub default_acl: Option<String>,
    /// Root allocation in bytes; zero disables space accounting.
    pub root_quota: i64,
    /// Seconds a connection may sit between commands.
    pub idle_timeout_secs: u64,
    /// Base seconds for a payload transfer before the 1 KiB/s floor scales it.
    pub stall_timeout_secs: u64,
    /// Largest buffered read or write; longer pwrite payloads are truncated
    /// and the excess drained.
    pub max_buffer_size: usize,
    /// Enables the job commands.
    pub allow_execute: bool,
    /// Accept a client-declared subject instead of deriving one from the
    /// peer address. Only sensible behind a trusted perimeter.
    pub trust_declared_identity: bool,
    /// Cap on a single job_wait, seconds.
    pub job_wait_max_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9094,
            root: PathBuf::from("."),
            superuser: None,
            read_only: false,
            default_acl: None,
            root_quota: 0,
            idle_timeout_secs: 60,
            stall_timeout_secs: 3600,
            max_buffer_size: DEFAULT_MAX_BUFFER,
            allow_execute: false,
            trust_declared_identity: false,
            job_wait_max_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("root directory must be set".to_string());
        }
        if self.root_quota < 0 {
            return Err("root quota cannot be negative".to_string());
        }
        if self.idle_timeout_secs == 0 || self.stall_timeout_secs == 0 {
            return Err("timeouts must be nonzero".to_string());
        }
        if self.max_buffer_size == 0 {
            return Err("max buffer size must be nonzero".to_string());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
