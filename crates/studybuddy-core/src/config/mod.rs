use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{endpoints, paths, payment, timeouts};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api: ApiSettings,
    pub payment: PaymentSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Overridden by the STUDYBUDDY_API_URL env var when set.
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub payment_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    pub provider_key_env: String,
    pub plan_id: String,
    /// Minor currency units.
    pub amount: u64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageSettings {
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiSettings {
                base_url: None,
                request_timeout_secs: timeouts::REQUEST_TIMEOUT_SECS,
                payment_timeout_secs: timeouts::PAYMENT_TIMEOUT_SECS,
            },
            payment: PaymentSettings {
                provider_key_env: payment::PROVIDER_KEY_ENV.to_string(),
                plan_id: payment::PRO_PLAN_ID.to_string(),
                amount: payment::PRO_AMOUNT,
                currency: payment::CURRENCY.to_string(),
            },
            storage: StorageSettings::default(),
        }
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(paths::CONFIG_DIR)
            .join(paths::CONFIG_FILE)
    }

    pub fn load() -> Self {
        let config_path = Self::config_path();
        if config_path.exists() {
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Ignoring malformed {}: {}", config_path.display(), e),
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> Result<(), crate::error::StudyError> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::StudyError::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Env var, then settings file, then the hosted default.
    pub fn api_base_url(&self) -> String {
        std::env::var(endpoints::API_URL_ENV)
            .ok()
            .filter(|url| !url.is_empty())
            .or_else(|| self.api.base_url.clone())
            .unwrap_or_else(|| endpoints::API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.api.payment_timeout_secs)
    }

    /// Publishable key of the payment provider, read from the configured env var.
    pub fn provider_key(&self) -> Option<String> {
        std::env::var(&self.payment.provider_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.storage.data_dir.clone()
    }
}
