use crate::constants::paths;
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};

/// Who is performing metered actions. Resolved once per session and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Identity {
    /// Anonymous; usage lives only on this device.
    Guest { device_id: String },
    /// Signed in; the server keeps the usage record.
    User { user_id: String },
}

impl Identity {
    pub fn guest(device_id: impl Into<String>) -> Self {
        Self::Guest {
            device_id: device_id.into(),
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Self::Guest { device_id } => format!("guest:{}", device_id),
            Self::User { user_id } => format!("user:{}", user_id),
        }
    }
}

/// Stable per-install identifier for guests, generated on first use.
pub fn device_id(storage: &dyn KeyValueStore) -> String {
    if let Ok(Some(existing)) = storage.get(paths::DEVICE_ID_KEY) {
        let existing = existing.trim().to_string();
        if !existing.is_empty() {
            return existing;
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = storage.set(paths::DEVICE_ID_KEY, &id) {
        tracing::warn!("Failed to persist device id: {}", e);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_device_id_is_stable() {
        let storage = MemoryStore::new();
        let first = device_id(&storage);
        let second = device_id(&storage);
        assert_eq!(first, second);
        assert!(first.contains('-'));
    }

    #[test]
    fn test_identity_wire_format() {
        let json = serde_json::to_value(Identity::user("u-1")).unwrap();
        assert_eq!(json["kind"], "user");
        assert_eq!(json["user_id"], "u-1");
        assert!(Identity::guest("d").is_guest());
    }
}
