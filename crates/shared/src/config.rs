//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration (required by the Postgres backend).
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Refund ledger configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body. Proof images travel inline as base64.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Where refund ledgers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Postgres through SeaORM.
    #[default]
    Postgres,
    /// Process-local store, lost on restart. Development only.
    Memory,
}

/// Refund ledger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: LedgerBackend,
    /// MIME types accepted for payment proof images.
    #[serde(default = "default_allowed_proof_mime_types")]
    pub allowed_proof_mime_types: Vec<String>,
    /// Maximum decoded size of a single proof image, in bytes.
    #[serde(default = "default_max_proof_bytes")]
    pub max_proof_bytes: u64,
    /// Maximum number of proof images attached to one payment.
    #[serde(default = "default_max_proofs_per_payment")]
    pub max_proofs_per_payment: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            allowed_proof_mime_types: default_allowed_proof_mime_types(),
            max_proof_bytes: default_max_proof_bytes(),
            max_proofs_per_payment: default_max_proofs_per_payment(),
        }
    }
}

fn default_allowed_proof_mime_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/webp".to_string(),
    ]
}

fn default_max_proof_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_max_proofs_per_payment() -> usize {
    10
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// Sources, later ones winning: `config/default`, `config/{RUN_MODE}`,
    /// then `TALLY__SECTION__KEY` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("TALLY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Returns the database URL, or an error when the Postgres backend has none.
    ///
    /// # Errors
    ///
    /// Returns an error if no `database.url` was configured.
    pub fn database_url(&self) -> Result<&str, config::ConfigError> {
        self.database
            .as_ref()
            .map(|db| db.url.as_str())
            .ok_or_else(|| config::ConfigError::NotFound("database.url".to_string()))
    }
}
