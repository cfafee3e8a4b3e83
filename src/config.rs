//! Command-line configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RETS_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags

use rets_client::{ClientConfig, HttpMethod};
use rets_protocol::{CapabilityUrls, RetsVersion};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server and protocol settings.
    pub server: ServerConfig,
    /// Login credentials.
    pub credentials: CredentialsConfig,
    /// HTTP settings.
    pub http: HttpConfig,
}

impl Config {
    /// Loads configuration from `path` (or RETS_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("RETS_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
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

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from a variable lookup.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.server.apply_overrides(&var);
        self.credentials.apply_overrides(&var);
        self.http.apply_overrides(&var);
    }

    /// Checks the configuration and builds the client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let login_url = self.server.login_url.trim();
        if login_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "server.login_url is required".to_string(),
            ));
        }
        CapabilityUrls::new(login_url)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let version = RetsVersion::parse(&self.server.version).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "unsupported RETS version '{}'",
                self.server.version
            ))
        })?;
        let method: HttpMethod = self
            .server
            .method
            .parse()
            .map_err(|e: rets_client::ClientError| ConfigError::ValidationError(e.to_string()))?;

        let mut config = ClientConfig::new(login_url)
            .with_version(version)
            .with_method(method)
            .with_strict(self.server.strict)
            .with_compact_metadata(self.server.compact_metadata)
            .with_request_ids(self.server.request_ids)
            .with_gzip(self.http.gzip)
            .with_connect_timeout(self.http.connect_timeout())
            .with_read_timeout(self.http.read_timeout())
            .with_object_buffer_size(self.http.object_buffer_size);
        if let Some(user_agent) = self.server.user_agent.as_deref().filter(|s| !s.is_empty()) {
            config = config.with_user_agent(user_agent);
        }
        if let Some(password) = self
            .server
            .user_agent_password
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            config = config.with_user_agent_password(password);
        }
        Ok(config)
    }
}

/// Server and protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Login transaction URL.
    pub login_url: String,
    /// Proposed RETS version, e.g. `RETS/1.7.2`.
    pub version: String,
    /// `GET` or `POST`.
    pub method: String,
    /// Reject protocol deviations.
    pub strict: bool,
    /// `User-Agent` header. Defaults to the library name.
    pub user_agent: Option<String>,
    /// Enables `RETS-UA-Authorization`.
    pub user_agent_password: Option<String>,
    /// Fetch COMPACT metadata instead of STANDARD-XML.
    pub compact_metadata: bool,
    /// Send a `RETS-Request-ID` with every request.
    pub request_ids: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            login_url: String::new(),
            version: RetsVersion::DEFAULT.to_string(),
            method: HttpMethod::default().to_string(),
            strict: false,
            user_agent: None,
            user_agent_password: None,
            compact_metadata: false,
            request_ids: false,
        }
    }
}

impl ServerConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("RETS_LOGIN_URL") {
            self.login_url = url;
        }
        if let Some(version) = var("RETS_VERSION") {
            self.version = version;
        }
        if let Some(method) = var("RETS_METHOD") {
            self.method = method;
        }
        if let Some(strict) = var("RETS_STRICT") {
            self.strict = is_true(&strict);
        }
        if let Some(agent) = var("RETS_USER_AGENT") {
            self.user_agent = Some(agent);
        }
        if let Some(password) = var("RETS_UA_PASSWORD") {
            self.user_agent_password = Some(password);
        }
        if let Some(compact) = var("RETS_COMPACT_METADATA") {
            self.compact_metadata = is_true(&compact);
        }
        if let Some(ids) = var("RETS_REQUEST_IDS") {
            self.request_ids = is_true(&ids);
        }
    }
}

/// Login credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
    /// Broker code sent when the server asks for one.
    pub broker_code: Option<String>,
    pub broker_branch: Option<String>,
}

impl CredentialsConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(username) = var("RETS_USERNAME") {
            self.username = username;
        }
        if let Some(password) = var("RETS_PASSWORD") {
            self.password = password;
        }
        if let Some(code) = var("RETS_BROKER_CODE") {
            self.broker_code = Some(code);
        }
        if let Some(branch) = var("RETS_BROKER_BRANCH") {
            self.broker_branch = Some(branch);
        }
    }
}

/// HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Negotiate gzip/deflate.
    pub gzip: bool,
    /// Multipart read buffer size in bytes.
    pub object_buffer_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: rets_client::connection::DEFAULT_CONNECT_TIMEOUT.as_secs(),
            read_timeout_secs: rets_client::connection::DEFAULT_READ_TIMEOUT.as_secs(),
            gzip: true,
            object_buffer_size: rets_protocol::multipart::DEFAULT_BUFFER_SIZE,
        }
    }
}

impl HttpConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(secs) = var("RETS_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.connect_timeout_secs = secs;
        }
        if let Some(secs) = var("RETS_READ_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.read_timeout_secs = secs;
        }
        if let Some(gzip) = var("RETS_GZIP") {
            self.gzip = is_true(&gzip);
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn is_true(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.version, "RETS/1.5");
        assert_eq!(config.server.method, "GET");
        assert_eq!(config.http.read_timeout(), Duration::from_secs(300));
        assert!(config.http.gzip);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rets.yaml");

        let mut config = Config::default();
        config.server.login_url = "http://rets.example.com/login".to_string();
        config.server.version = "RETS/1.7.2".to_string();
        config.credentials.username = "agent".to_string();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.login_url, config.server.login_url);
        assert_eq!(loaded.server.version, "RETS/1.7.2");
        assert_eq!(loaded.credentials.username, "agent");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"server:\n  login_url: http://h/login\n  strict: true\ncredentials:\n  username: u\n",
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.server.strict);
        assert_eq!(config.server.method, "GET");
        assert_eq!(config.credentials.password, "");
        assert_eq!(config.http.connect_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"server: [unclosed").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::ParseError(_, _))
        ));
        assert!(matches!(
            Config::from_file("/nonexistent/rets.yaml"),
            Err(ConfigError::IoError(_, _))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RETS_LOGIN_URL", "http://override/login"),
            ("RETS_USERNAME", "env-user"),
            ("RETS_PASSWORD", "env-pass"),
            ("RETS_STRICT", "TRUE"),
            ("RETS_READ_TIMEOUT", "60"),
            ("RETS_CONNECT_TIMEOUT", "not a number"),
            ("RETS_BROKER_CODE", "BRK"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.server.login_url, "http://override/login");
        assert_eq!(config.credentials.username, "env-user");
        assert_eq!(config.credentials.password, "env-pass");
        assert_eq!(config.credentials.broker_code.as_deref(), Some("BRK"));
        assert!(config.server.strict);
        assert_eq!(config.http.read_timeout_secs, 60);
        assert_eq!(config.http.connect_timeout_secs, 30);
    }

    #[test]
    fn test_client_config() {
        let mut config = Config::default();
        assert!(matches!(
            config.client_config(),
            Err(ConfigError::ValidationError(_))
        ));

        config.server.login_url = "http://rets.example.com/login".to_string();
        config.server.version = "1.7.2".to_string();
        config.server.method = "post".to_string();
        config.server.user_agent = Some("MyApp/2.0".to_string());
        config.server.user_agent_password = Some("uapw".to_string());
        let client = config.client_config().unwrap();
        assert_eq!(client.version, RetsVersion::V1_7_2);
        assert_eq!(client.method, HttpMethod::Post);
        assert_eq!(client.user_agent, "MyApp/2.0");
        assert_eq!(client.user_agent_password.as_deref(), Some("uapw"));

        config.server.version = "RETS/9.9".to_string();
        assert!(config.client_config().is_err());
        config.server.version = "RETS/1.5".to_string();
        config.server.method = "PUT".to_string();
        assert!(config.client_config().is_err());
        config.server.method = "GET".to_string();
        config.server.login_url = "not a url".to_string();
        assert!(config.client_config().is_err());
    }
}
