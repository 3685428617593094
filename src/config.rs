use serde::{Deserialize, Serialize};

use crate::codec::EncoderOptions;
use crate::logic::{ConflictPolicy, DiscriminatorPolicy, ReconcileOptions, ViewConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub codec: EncoderOptions,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub discriminator_policy: DiscriminatorPolicy,
    /// Extra attempts for an update that hits a version conflict; 0 surfaces it
    #[serde(default)]
    pub conflict_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub load_seed_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and
    /// `LIANT__SECTION__KEY` environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Keys contain underscores, so sections are split on "__"
        config = config.add_source(
            config::Environment::with_prefix("LIANT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn view_config(&self) -> ViewConfig {
        ViewConfig {
            encoder: self.codec.clone(),
            reconcile: ReconcileOptions {
                discriminator_policy: self.reconcile.discriminator_policy,
            },
            conflict: ConflictPolicy::from_retries(self.reconcile.conflict_retries),
        }
    }
}
