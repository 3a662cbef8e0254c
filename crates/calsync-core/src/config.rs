use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

const APP_DIR: &str = "calsync";
const CONFIG_FILE: &str = "config.toml";

const ENV_CLIENT_ID: &str = "CALSYNC_GOOGLE_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "CALSYNC_GOOGLE_CLIENT_SECRET";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity provider settings
    #[serde(default)]
    pub google: GoogleConfig,

    /// Remote calendar settings
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Credential persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Interactive authorization settings
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Google OAuth client registration and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// OAuth client ID
    /// Create at: https://console.cloud.google.com/apis/credentials
    pub client_id: String,
    /// Client secret, only required for confidential (desktop) clients
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

impl GoogleConfig {
    /// Check if credentials are configured (not placeholders)
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_id.starts_with("YOUR_")
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: "YOUR_GOOGLE_CLIENT_ID".to_string(),
            client_secret: None,
            redirect_uri: "http://127.0.0.1:8085/callback".to_string(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "https://www.googleapis.com/auth/calendar.events".to_string(),
            ],
            issuer: "https://accounts.google.com".to_string(),
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub api_base_url: String,
    pub calendar_id: String,
    /// Result cap for upcoming event listings
    pub max_results: u32,
    pub request_timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            calendar_id: "primary".to_string(),
            max_results: 20,
            request_timeout_secs: 30,
        }
    }
}

/// Where the credential record is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Override for the file backend directory (defaults to `<config>/calsync/tokens`)
    pub directory: Option<PathBuf>,
}

impl StorageConfig {
    /// Directory used by the file backend.
    pub fn token_directory(&self) -> Result<PathBuf, ConfigError> {
        match &self.directory {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Config::app_dir()?.join("tokens")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// How long to wait for the browser redirect
    pub callback_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            callback_timeout_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&contents)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult), ConfigError> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Environment variables take precedence over file values for client credentials.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup(ENV_CLIENT_ID).filter(|v| !v.is_empty()) {
            self.google.client_id = id;
        }
        if let Some(secret) = lookup(ENV_CLIENT_SECRET).filter(|v| !v.is_empty()) {
            self.google.client_secret = Some(secret);
        }
    }

    /// Fail unless a real OAuth client id is present.
    pub fn require_google(&self) -> Result<&GoogleConfig, ConfigError> {
        if self.google.is_configured() {
            Ok(&self.google)
        } else {
            Err(ConfigError::MissingSetting("google.client_id".to_string()))
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        validate_url(&self.google.redirect_uri, "google.redirect_uri", &mut result);
        validate_url(
            &self.google.authorization_endpoint,
            "google.authorization_endpoint",
            &mut result,
        );
        validate_url(&self.google.token_endpoint, "google.token_endpoint", &mut result);
        validate_url(&self.calendar.api_base_url, "calendar.api_base_url", &mut result);

        if let Ok(redirect) = Url::parse(&self.google.redirect_uri) {
            let loopback = matches!(redirect.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"));
            if !loopback {
                result.add_warning(
                    "google.redirect_uri",
                    "Redirect URI is not a loopback address; the browser flow cannot receive it",
                );
            }
        }

        if self.google.scopes.is_empty() {
            result.add_error("google.scopes", "At least one scope is required");
        }

        if !self.google.is_configured() {
            result.add_warning(
                "google.client_id",
                "Google OAuth not configured - sign-in will be unavailable",
            );
        }

        if self.calendar.calendar_id.is_empty() {
            result.add_error("calendar.calendar_id", "Calendar id cannot be empty");
        }

        if self.calendar.max_results == 0 {
            result.add_error("calendar.max_results", "Result cap must be greater than 0");
        } else if self.calendar.max_results > 2500 {
            result.add_warning(
                "calendar.max_results",
                "Result cap above 2500 is clamped by the provider",
            );
        }

        if self.calendar.request_timeout_secs == 0 {
            result.add_error(
                "calendar.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        if self.auth.callback_timeout_secs == 0 {
            result.add_error(
                "auth.callback_timeout_secs",
                "Callback timeout must be greater than 0",
            );
        }

        result
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `<config_dir>/calsync`
    pub fn app_dir() -> Result<PathBuf, ConfigError> {
        Ok(dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join(APP_DIR))
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::app_dir()?.join(CONFIG_FILE))
    }
}

fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }
            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }
            if url.port() == Some(0) {
                result.add_error(field_name, "Port cannot be 0");
            }
        }
        Err(e) => result.add_error(field_name, format!("Invalid URL: {}", e)),
    }
}
