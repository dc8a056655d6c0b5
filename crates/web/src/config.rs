//! Server configuration
//!
//! Loaded once at startup from TOML, overlaid with `PEERGATE_*` environment
//! variables, then validated eagerly so a bad prefix, bit width or missing
//! helper stops the process before it serves a single request.

use peergate_common::{validate::validate_public_key, Error, PoolConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The only PATH the helper (and `sudo`) ever sees
pub const HELPER_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address
    pub listen: String,

    /// SQLite state database
    pub db_path: PathBuf,

    pub auth: AuthConfig,
    pub pool: PoolSettings,
    pub tunnel: TunnelConfig,
    pub applier: ApplierConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            db_path: peergate_common::default_db_path(),
            auth: AuthConfig::default(),
            pool: PoolSettings::default(),
            tunnel: TunnelConfig::default(),
            applier: ApplierConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Static master secret. When unset only enrollment tokens are accepted.
    pub master_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Address prefix the pool id is appended to (after `::`)
    pub prefix: String,

    /// Pool width in bits (1-32)
    pub bits: u8,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            prefix: "fd00:1".to_string(),
            bits: 16,
        }
    }
}

/// Public parameters handed to clients for building their config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub server_public_key: String,
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub dns: Option<String>,
    pub allowed_ips: String,
    pub keepalive: u16,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            server_public_key: String::new(),
            endpoint_host: String::new(),
            endpoint_port: 51820,
            dns: None,
            allowed_ips: "::/0".to_string(),
            keepalive: 25,
        }
    }
}

impl TunnelConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.endpoint_host, self.endpoint_port)
    }
}

/// Privileged helper that mutates the live interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    pub helper: PathBuf,

    /// Run the helper through `sudo -n`
    pub use_sudo: bool,

    /// Tunnel interface, passed to the helper as WG_IF
    pub interface: String,

    /// Uplink interface, passed as WAN_IF when set
    pub wan_interface: Option<String>,

    pub timeout_secs: u64,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            helper: PathBuf::from("/usr/local/sbin/peergate-wg-apply"),
            use_sudo: false,
            interface: "wg0".to_string(),
            wan_interface: None,
            timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file, or defaults when it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay `PEERGATE_*` environment variables
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = get("PEERGATE_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = get("PEERGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("PEERGATE_API_TOKEN") {
            self.auth.master_token = Some(v);
        }
        if let Some(v) = get("PEERGATE_POOL_PREFIX") {
            self.pool.prefix = v;
        }
        if let Some(v) = get("PEERGATE_POOL_BITS") {
            self.pool.bits = v.parse()?;
        }
        if let Some(v) = get("PEERGATE_SERVER_PUBLIC_KEY") {
            self.tunnel.server_public_key = v;
        }
        if let Some(v) = get("PEERGATE_ENDPOINT_HOST") {
            self.tunnel.endpoint_host = v;
        }
        if let Some(v) = get("PEERGATE_ENDPOINT_PORT") {
            self.tunnel.endpoint_port = v.parse()?;
        }
        if let Some(v) = get("PEERGATE_DNS") {
            self.tunnel.dns = Some(v);
        }
        if let Some(v) = get("PEERGATE_HELPER") {
            self.applier.helper = PathBuf::from(v);
        }
        if let Some(v) = get("PEERGATE_WG_IF") {
            self.applier.interface = v;
        }
        if let Some(v) = get("PEERGATE_WAN_IF") {
            self.applier.wan_interface = Some(v);
        }
        Ok(())
    }

    /// Validate everything that does not need the helper on disk
    pub fn validate_static(&self) -> Result<PoolConfig> {
        let pool = PoolConfig::new(self.pool.prefix.clone(), self.pool.bits)?;

        if let Some(token) = &self.auth.master_token {
            if token.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "auth.master_token is set but empty".to_string(),
                ));
            }
        }

        validate_public_key(&self.tunnel.server_public_key).map_err(|e| {
            Error::InvalidConfig(format!("tunnel.server_public_key: {}", e))
        })?;
        if self.tunnel.endpoint_host.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "tunnel.endpoint_host is required".to_string(),
            ));
        }
        if self.tunnel.endpoint_port == 0 {
            return Err(Error::InvalidConfig(
                "tunnel.endpoint_port must be non-zero".to_string(),
            ));
        }

        validate_interface_name("applier.interface", &self.applier.interface)?;
        if let Some(wan) = &self.applier.wan_interface {
            validate_interface_name("applier.wan_interface", wan)?;
        }
        if self.applier.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "applier.timeout_secs must be positive".to_string(),
            ));
        }

        Ok(pool)
    }

    /// Full startup validation, including helper presence
    pub fn validate(&self) -> Result<PoolConfig> {
        let pool = self.validate_static()?;
        check_executable(&self.applier.helper)?;
        if self.applier.use_sudo {
            find_program("sudo")?;
        }
        Ok(pool)
    }
}

fn validate_interface_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 15 || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidConfig(format!(
            "{} '{}' must be 1-15 alphanumeric characters",
            field, name
        )));
    }
    Ok(())
}

/// The helper must exist as a regular file with an execute bit
pub fn check_executable(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| {
        Error::InvalidConfig(format!("helper {} not found: {}", path.display(), e))
    })?;
    if !meta.is_file() {
        return Err(Error::InvalidConfig(format!(
            "helper {} is not a regular file",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(Error::InvalidConfig(format!(
                "helper {} is not executable",
                path.display()
            )));
        }
    }

    Ok(())
}

/// Resolve a program on the helper PATH
pub fn find_program(name: &str) -> Result<PathBuf> {
    find_program_in(name, HELPER_PATH.split(':').map(Path::new))
}

fn find_program_in<'a>(name: &str, dirs: impl IntoIterator<Item = &'a Path>) -> Result<PathBuf> {
    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| check_executable(candidate).is_ok())
        .ok_or_else(|| {
            Error::InvalidConfig(format!("{} not found on {}", name, HELPER_PATH))
        })
}
