//! Configuration loading for the authorization-provider client.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `APIM_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Application configuration derived from `APIM_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_resource_manager_endpoint")]
    pub resource_manager_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_authorization_provider_api_version")]
    pub authorization_provider_api_version: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub redirect: RedirectConfig,
    #[serde(default)]
    pub identity_discovery: IdentityDiscoveryConfig,
}

/// Where the OAuth login flow sends the browser once the user has consented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RedirectConfig {
    /// URL scheme registered by the host application
    ///
    /// Environment variable: `APIM_REDIRECT_SCHEME`
    #[serde(default = "default_redirect_scheme")]
    pub scheme: String,

    /// Host application identifier, used as the authority of the redirect URL
    ///
    /// Environment variable: `APIM_HOST_APP_ID`
    #[serde(default = "default_host_app_id")]
    pub host_app_id: String,
}

/// Optional discovery of workload managed identities when granting permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IdentityDiscoveryConfig {
    /// Query the resource graph for web apps with managed identities (default: false)
    ///
    /// Environment variable: `APIM_DISCOVER_MANAGED_IDENTITIES`
    #[serde(default)]
    pub enabled: bool,

    /// Resource graph request timeout in milliseconds (default: 5000)
    ///
    /// Environment variable: `APIM_RESOURCE_GRAPH_TIMEOUT_MS`
    #[serde(default = "default_resource_graph_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            resource_manager_endpoint: default_resource_manager_endpoint(),
            subscription_id: None,
            resource_group: None,
            service_name: None,
            access_token: None,
            api_version: default_api_version(),
            authorization_provider_api_version: default_authorization_provider_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
            redirect: RedirectConfig::default(),
            identity_discovery: IdentityDiscoveryConfig::default(),
        }
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            scheme: default_redirect_scheme(),
            host_app_id: default_host_app_id(),
        }
    }
}

impl Default for IdentityDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_resource_graph_timeout_ms(),
        }
    }
}

impl RedirectConfig {
    /// URL the login flow redirects to after the user completes consent.
    pub fn post_login_redirect_url(&self) -> String {
        format!(
            "{}://{}/{}",
            self.scheme,
            self.host_app_id,
            crate::callback::AUTHORIZATION_CALLBACK_PATH
        )
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.access_token.is_some() {
            config.access_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Resolves the service coordinates, failing when any of them is unset.
    pub fn service_coordinates(&self) -> Result<(String, String, String), ConfigError> {
        let subscription_id = self
            .subscription_id
            .clone()
            .ok_or(ConfigError::MissingSetting { key: "SUBSCRIPTION_ID" })?;
        let resource_group = self
            .resource_group
            .clone()
            .ok_or(ConfigError::MissingSetting { key: "RESOURCE_GROUP" })?;
        let service_name = self
            .service_name
            .clone()
            .ok_or(ConfigError::MissingSetting { key: "SERVICE_NAME" })?;
        Ok((subscription_id, resource_group, service_name))
    }

    /// Validates the configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.resource_manager_endpoint).map_err(|source| {
            ConfigError::InvalidEndpoint {
                value: self.resource_manager_endpoint.clone(),
                source,
            }
        })?;
        if !matches!(endpoint.scheme(), "https" | "http") {
            return Err(ConfigError::InvalidEndpointScheme {
                value: self.resource_manager_endpoint.clone(),
            });
        }

        if self.request_timeout_secs == 0 || self.request_timeout_secs > 600 {
            return Err(ConfigError::InvalidRequestTimeout {
                value: self.request_timeout_secs,
            });
        }

        if self.identity_discovery.timeout_ms == 0 {
            return Err(ConfigError::InvalidResourceGraphTimeout {
                value: self.identity_discovery.timeout_ms,
            });
        }

        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.redirect.scheme.is_empty() || self.redirect.host_app_id.is_empty() {
            return Err(ConfigError::MissingSetting {
                key: "REDIRECT_SCHEME/HOST_APP_ID",
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_resource_manager_endpoint() -> String {
    "https://management.azure.com".to_string()
}

fn default_api_version() -> String {
    "2018-06-01-preview".to_string()
}

fn default_authorization_provider_api_version() -> String {
    "2021-04-01-preview".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_redirect_scheme() -> String {
    "vscode".to_string()
}

fn default_host_app_id() -> String {
    "ms-azuretools.vscode-apimanagement".to_string()
}

fn default_resource_graph_timeout_ms() -> u64 {
    5000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid resource manager endpoint '{value}': {source}")]
    InvalidEndpoint {
        value: String,
        source: url::ParseError,
    },
    #[error("resource manager endpoint '{value}' must use http or https")]
    InvalidEndpointScheme { value: String },
    #[error("request timeout must be between 1 and 600 seconds, got {value}")]
    InvalidRequestTimeout { value: u64 },
    #[error("resource graph timeout must be positive, got {value}")]
    InvalidResourceGraphTimeout { value: u64 },
    #[error("log format must be 'pretty' or 'json', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid boolean for {key}: '{value}'")]
    InvalidBool { key: &'static str, value: String },
    #[error("{key} is not configured; set APIM_{key}")]
    MissingSetting { key: &'static str },
}

/// Loads configuration using layered `.env` files and `APIM_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
    profile_override: Option<String>,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            profile_override: None,
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            profile_override: None,
        }
    }

    /// Selects the profile explicitly, ahead of `APIM_PROFILE`.
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile_override = profile.filter(|p| !p.trim().is_empty());
        self
    }

    /// Loads configuration from `.env` layers, then the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("APIM_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        self.build(layered, profile_hint)
    }

    /// Builds a configuration from already collected `APIM_`-stripped values.
    fn build(
        &self,
        mut layered: BTreeMap<String, String>,
        profile_hint: String,
    ) -> Result<AppConfig, ConfigError> {
        let mut take = |key: &str| {
            layered
                .remove(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let profile = self
            .profile_override
            .clone()
            .or_else(|| take("PROFILE"))
            .unwrap_or(profile_hint);
        let log_level = take("LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take("LOG_FORMAT").unwrap_or_else(default_log_format);
        let resource_manager_endpoint = take("RESOURCE_MANAGER_ENDPOINT")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(default_resource_manager_endpoint);
        let subscription_id = take("SUBSCRIPTION_ID");
        let resource_group = take("RESOURCE_GROUP");
        let service_name = take("SERVICE_NAME");
        let access_token = take("ACCESS_TOKEN");
        let api_version = take("API_VERSION").unwrap_or_else(default_api_version);
        let authorization_provider_api_version = take("AUTHORIZATION_PROVIDER_API_VERSION")
            .unwrap_or_else(default_authorization_provider_api_version);
        let request_timeout_secs = take("REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_request_timeout_secs);

        let redirect = RedirectConfig {
            scheme: take("REDIRECT_SCHEME").unwrap_or_else(default_redirect_scheme),
            host_app_id: take("HOST_APP_ID").unwrap_or_else(default_host_app_id),
        };

        let enabled = match take("DISCOVER_MANAGED_IDENTITIES") {
            Some(value) => parse_bool("DISCOVER_MANAGED_IDENTITIES", &value)?,
            None => false,
        };
        let identity_discovery = IdentityDiscoveryConfig {
            enabled,
            timeout_ms: take("RESOURCE_GRAPH_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_resource_graph_timeout_ms),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            resource_manager_endpoint,
            subscription_id,
            resource_group,
            service_name,
            access_token,
            api_version,
            authorization_provider_api_version,
            request_timeout_secs,
            redirect,
            identity_discovery,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = self
            .profile_override
            .clone()
            .or_else(|| env::var("APIM_PROFILE").ok())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("APIM_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: value.to_string(),
        }),
    }
}
