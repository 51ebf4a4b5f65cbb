//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RNTBD_CONFIG or --config)
//! 3. Environment variables

use rntbd_protocol::{FRAME_PREFIX_SIZE, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Wire protocol and handshake configuration.
    pub protocol: ProtocolConfig,
    /// Canned response payloads.
    pub fixture: FixtureConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RNTBD_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.protocol.apply_env_overrides();
        self.fixture.apply_env_overrides();
        self.tls.apply_env_overrides();
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.validate()?;
        self.tls.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, rntbd_protocol::DEFAULT_PORT)),
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RNTBD_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(max) = std::env::var("RNTBD_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }
}

/// What to do with frames that arrive out of handshake order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePolicy {
    /// Dispatch requests sent before the context request, and answer
    /// repeated context requests again.
    #[default]
    Lenient,
    /// Close the connection on any out-of-order frame.
    Strict,
}

impl FromStr for HandshakePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(HandshakePolicy::Lenient),
            "strict" => Ok(HandshakePolicy::Strict),
            other => Err(ConfigError::ValidationError(format!(
                "unknown handshake policy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for HandshakePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePolicy::Lenient => write!(f, "lenient"),
            HandshakePolicy::Strict => write!(f, "strict"),
        }
    }
}

/// Protocol configuration.
///
/// The timeouts are advertised to clients in the context response; the
/// server does not enforce them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest accepted frame or payload block in bytes.
    pub max_frame_size: u32,
    pub idle_timeout_secs: u32,
    pub unauthenticated_timeout_secs: u32,
    pub server_agent: String,
    pub server_version: String,
    pub handshake: HandshakePolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            idle_timeout_secs: 120,
            unauthenticated_timeout_secs: 25,
            server_agent: "RntbdMockServer".to_string(),
            server_version: "1.0".to_string(),
            handshake: HandshakePolicy::Lenient,
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("RNTBD_MAX_FRAME_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_frame_size = n;
            }
        }

        if let Ok(policy) = std::env::var("RNTBD_HANDSHAKE") {
            match policy.parse() {
                Ok(parsed) => self.handshake = parsed,
                Err(e) => tracing::warn!("Ignoring RNTBD_HANDSHAKE: {}", e),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size < FRAME_PREFIX_SIZE as u32 {
            return Err(ConfigError::ValidationError(format!(
                "max_frame_size must be at least {} bytes",
                FRAME_PREFIX_SIZE
            )));
        }
        // The encoder caps frames at the protocol maximum.
        if self.max_frame_size > MAX_FRAME_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "max_frame_size must be at most {} bytes",
                MAX_FRAME_SIZE
            )));
        }
        if self.server_agent.len() > u8::MAX as usize || self.server_version.len() > u8::MAX as usize
        {
            return Err(ConfigError::ValidationError(
                "server_agent and server_version must fit in 255 bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fixture configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// JSON file served for document reads instead of the built-in document.
    pub document_path: Option<PathBuf>,
}

impl FixtureConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RNTBD_DOCUMENT_FIXTURE") {
            self.document_path = Some(PathBuf::from(path));
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// Path to PEM-encoded server certificate file.
    pub cert_path: Option<PathBuf>,
    /// Path to PEM-encoded private key file.
    pub key_path: Option<PathBuf>,
    /// Require client certificate authentication (mTLS).
    pub require_client_cert: bool,
    /// Path to PEM-encoded CA certificate(s) for verifying client certs.
    /// Required if require_client_cert is true.
    pub client_ca_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("RNTBD_TLS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("RNTBD_TLS_CERT") {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("RNTBD_TLS_KEY") {
            self.key_path = Some(PathBuf::from(path));
        }
        if let Ok(require) = std::env::var("RNTBD_TLS_REQUIRE_CLIENT_CERT") {
            self.require_client_cert = require == "1" || require.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("RNTBD_TLS_CLIENT_CA") {
            self.client_ca_path = Some(PathBuf::from(path));
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.cert_path.is_none() {
            return Err(ConfigError::ValidationError(
                "TLS enabled but cert_path not set".to_string(),
            ));
        }
        if self.key_path.is_none() {
            return Err(ConfigError::ValidationError(
                "TLS enabled but key_path not set".to_string(),
            ));
        }
        if self.require_client_cert && self.client_ca_path.is_none() {
            return Err(ConfigError::ValidationError(
                "mTLS enabled but client_ca_path not set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serializes `SocketAddr` as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 8009);
        assert_eq!(config.protocol.max_frame_size, 4 * 1024 * 1024);
        assert_eq!(config.protocol.idle_timeout_secs, 120);
        assert_eq!(config.protocol.unauthenticated_timeout_secs, 25);
        assert_eq!(config.protocol.server_agent, "RntbdMockServer");
        assert_eq!(config.protocol.handshake, HandshakePolicy::Lenient);
        assert!(config.fixture.document_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.protocol.handshake = HandshakePolicy::Strict;
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("handshake: strict"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.protocol.handshake, HandshakePolicy::Strict);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:10253\"\nprotocol:\n  server_version: \"2.0\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 10253);
        assert_eq!(config.network.max_connections, 1000);
        assert_eq!(config.protocol.server_version, "2.0");
        assert_eq!(config.protocol.server_agent, "RntbdMockServer");
    }

    #[test]
    fn test_from_file_errors() {
        let err = Config::from_file("/nonexistent/rntbd.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network: [not, a, map]").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_save_and_reload() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.protocol.idle_timeout_secs = 30;
        config.save(file.path()).unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.protocol.idle_timeout_secs, 30);
    }

    #[test]
    fn test_handshake_policy_parse() {
        assert_eq!("STRICT".parse::<HandshakePolicy>().unwrap(), HandshakePolicy::Strict);
        assert_eq!("lenient".parse::<HandshakePolicy>().unwrap(), HandshakePolicy::Lenient);
        assert!("sloppy".parse::<HandshakePolicy>().is_err());
        assert_eq!(HandshakePolicy::Strict.to_string(), "strict");
    }

    #[test]
    fn test_protocol_validation() {
        let mut protocol = ProtocolConfig {
            max_frame_size: 16,
            ..Default::default()
        };
        assert!(protocol.validate().is_err());

        protocol.max_frame_size = 1024;
        protocol.server_agent = "x".repeat(300);
        assert!(protocol.validate().is_err());
    }

    #[test]
    fn test_max_frame_size_bounds() {
        let mut protocol = ProtocolConfig {
            max_frame_size: MAX_FRAME_SIZE,
            ..Default::default()
        };
        assert!(protocol.validate().is_ok());

        protocol.max_frame_size = MAX_FRAME_SIZE + 1;
        let err = protocol.validate().unwrap_err();
        assert!(err.to_string().contains("at most"));

        let mut config = Config::default();
        config.protocol.max_frame_size = u32::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_validation() {
        let tls = TlsConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(tls.validate().unwrap_err().to_string().contains("cert_path"));

        let tls = TlsConfig {
            enabled: true,
            cert_path: Some("cert.pem".into()),
            key_path: Some("key.pem".into()),
            require_client_cert: true,
            client_ca_path: None,
        };
        assert!(tls.validate().unwrap_err().to_string().contains("client_ca_path"));

        assert!(TlsConfig::default().validate().is_ok());
    }
}
