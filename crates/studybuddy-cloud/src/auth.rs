use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use studybuddy_core::constants::paths;
use studybuddy_core::identity::{self, Identity};
use studybuddy_core::KeyValueStore;

/// Stored credentials (persisted to ~/.config/studybuddy/cloud.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CloudCredentials {
    pub email: Option<String>,
    pub user_id: Option<String>,
    /// Bearer token issued at sign-in.
    pub api_token: Option<String>,
}

impl CloudCredentials {
    pub fn load() -> Self {
        Self::load_from(&credentials_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(path) {
            toml::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable credentials at {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&credentials_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Remove the stored credentials. Missing file is fine.
    pub fn clear() -> anyhow::Result<()> {
        let path = credentials_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_token.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
            && self.user_id.as_ref().map(|u| !u.is_empty()).unwrap_or(false)
    }

    /// Who is using the app right now: the signed-in user, or this device as a guest.
    pub fn identity(&self, storage: &dyn KeyValueStore) -> Identity {
        match (&self.user_id, self.is_authenticated()) {
            (Some(user_id), true) => Identity::user(user_id.clone()),
            _ => Identity::guest(identity::device_id(storage)),
        }
    }
}

fn credentials_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(paths::CONFIG_DIR)
        .join(paths::CREDENTIALS_FILE)
}
