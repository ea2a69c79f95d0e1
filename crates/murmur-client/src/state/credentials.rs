//! Access key storage
//!
//! Keeps the access key and its expiry in a local JSON file so the client
//! can skip the login prompt on the next start.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use murmur_protocol::AuthResponse;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access_key: String,
    /// Expiry of the access key, seconds since epoch
    pub death_ts: i64,
}

impl From<AuthResponse> for StoredCredentials {
    fn from(response: AuthResponse) -> Self {
        Self {
            access_key: response.access_key,
            death_ts: response.death_ts,
        }
    }
}

impl StoredCredentials {
    fn credentials_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("murmur").join("credentials.json"))
    }

    pub fn is_expired_at(&self, now_ts: i64) -> bool {
        self.death_ts <= now_ts
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    /// Load stored credentials, skipping expired ones
    pub fn load() -> Option<Self> {
        let Some(path) = Self::credentials_path() else {
            tracing::warn!("Could not determine config directory");
            return None;
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        if !path.exists() {
            tracing::debug!("No stored credentials at {:?}", path);
            return None;
        }

        let credentials: Self = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(credentials) => credentials,
                Err(e) => {
                    tracing::error!("Failed to parse credentials file: {}", e);
                    return None;
                }
            },
            Err(e) => {
                tracing::error!("Failed to read credentials file: {}", e);
                return None;
            }
        };

        if credentials.is_expired() {
            tracing::info!("Stored access key expired, login required");
            return None;
        }
        Some(credentials)
    }

    pub fn save(&self) {
        let Some(path) = Self::credentials_path() else {
            tracing::warn!("Could not determine config directory");
            return;
        };
        self.save_to(&path);
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!("Failed to create config directory: {}", e);
                return;
            }
        }

        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::error!("Failed to write credentials file: {}", e);
                } else {
                    tracing::debug!("Saved credentials to {:?}", path);
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize credentials: {}", e);
            }
        }
    }

    /// Forget the stored access key
    pub fn clear() {
        if let Some(path) = Self::credentials_path() {
            Self::clear_at(&path);
        }
    }

    pub fn clear_at(path: &Path) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::error!("Failed to remove credentials file: {}", e);
            } else {
                tracing::info!("Cleared stored credentials");
            }
        }
    }
}
