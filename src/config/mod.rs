//! Configuration module for Local Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("UPLOAD_DIR", "/srv/uploads");
/// let result = expand_env_vars("root: ${UPLOAD_DIR}");
/// assert_eq!(result, "root: /srv/uploads");
///
/// let result = expand_env_vars("${MISSING:-uploads}");
/// assert_eq!(result, "uploads");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        // Append the text before the match
        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Parse configuration from YAML text, expanding environment variables
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        ConfigLoader::parse(content)
    }

    /// Find the upload route registered for an exact request path
    pub fn route_for_path(&self, path: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|route| route.path == path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server_addr: SocketAddr = self.server.address.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid server address '{}': {}",
                self.server.address, e
            ))
        })?;

        if self.server.max_concurrent_uploads == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_concurrent_uploads must be greater than zero".into(),
            ));
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "Storage root cannot be empty".into(),
            ));
        }

        if self.storage.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "Storage buffer_size must be greater than zero".into(),
            ));
        }

        if self.routes.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one upload route must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "Route path '{}' must start with /",
                    route.path
                )));
            }

            if route.path == "/" || route.path == "/health" {
                return Err(ConfigError::ValidationError(format!(
                    "Route path '{}' is reserved",
                    route.path
                )));
            }

            if !seen.insert(route.path.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate route path '{}'",
                    route.path
                )));
            }

            match route.mode {
                RouteMode::Raw if route.filename_header.trim().is_empty() => {
                    return Err(ConfigError::ValidationError(format!(
                        "Raw route '{}' needs a filename_header",
                        route.path
                    )));
                }
                RouteMode::Single | RouteMode::Multiple if route.field.trim().is_empty() => {
                    return Err(ConfigError::ValidationError(format!(
                        "Multipart route '{}' needs a field name",
                        route.path
                    )));
                }
                _ => {}
            }
        }

        if self.metrics.enabled && self.metrics.port == server_addr.port() {
            return Err(ConfigError::ValidationError(format!(
                "Metrics port {} collides with the server port",
                self.metrics.port
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Upper bound on uploads handled at once. `None` leaves admission to the OS.
    #[serde(default)]
    pub max_concurrent_uploads: Option<usize>,
}

/// Destination storage configuration handed to the ingestion core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Largest accepted payload in bytes. `None` disables the limit.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: Option<u64>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl StorageConfig {
    /// Storage rooted at `root` with default limits
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            max_upload_bytes: default_max_upload_bytes(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_bytes() -> Option<u64> {
    Some(10 << 20) // 10MB
}

fn default_buffer_size() -> usize {
    65536 // 64KB
}

/// How an upload route reads its request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Entire body is the file, name carried in a header
    Raw,
    /// One multipart file field
    Single,
    /// Any number of multipart file fields sharing one name
    Multiple,
}

impl RouteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMode::Raw => "raw",
            RouteMode::Single => "single",
            RouteMode::Multiple => "multiple",
        }
    }

    pub fn is_multipart(&self) -> bool {
        !matches!(self, RouteMode::Raw)
    }
}

/// Upload route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    pub mode: RouteMode,
    /// Multipart field carrying the file(s)
    #[serde(default = "default_field")]
    pub field: String,
    /// Header carrying the file name of a raw upload
    #[serde(default = "default_filename_header")]
    pub filename_header: String,
}

impl RouteConfig {
    pub fn raw(path: &str) -> Self {
        Self {
            path: path.to_string(),
            mode: RouteMode::Raw,
            field: default_field(),
            filename_header: default_filename_header(),
        }
    }

    pub fn single(path: &str, field: &str) -> Self {
        Self {
            path: path.to_string(),
            mode: RouteMode::Single,
            field: field.to_string(),
            filename_header: default_filename_header(),
        }
    }

    pub fn multiple(path: &str, field: &str) -> Self {
        Self {
            path: path.to_string(),
            mode: RouteMode::Multiple,
            field: field.to_string(),
            filename_header: default_filename_header(),
        }
    }
}

fn default_field() -> String {
    "file".to_string()
}

fn default_filename_header() -> String {
    "X-Filename".to_string()
}

fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig::single("/upload", "file"),
        RouteConfig::multiple("/multipleUpload", "files"),
        RouteConfig::raw("/binaryUpload"),
    ]
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
