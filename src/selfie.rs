use crate::db::{RealtimeDatabase, Snapshot, Subscription};
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ANONYMOUS_PATH: &str = "selfies/anonymous";
const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Which admin a capture is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerScope {
    Admin(String),
    Anonymous,
}

impl OwnerScope {
    /// Blank identifiers fall into the anonymous bucket.
    pub fn from_uid(uid: Option<&str>) -> Self {
        match uid.map(str::trim) {
            Some(uid) if !uid.is_empty() => OwnerScope::Admin(uid.to_string()),
            _ => OwnerScope::Anonymous,
        }
    }

    pub fn path(&self) -> String {
        match self {
            OwnerScope::Admin(uid) => format!("userSelfies/{}", uid),
            OwnerScope::Anonymous => ANONYMOUS_PATH.to_string(),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            OwnerScope::Admin(uid) => Some(uid),
            OwnerScope::Anonymous => None,
        }
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerScope::Admin(uid) => write!(f, "{}", uid),
            OwnerScope::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// A PNG carried as a `data:` URL, the form the collection stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData(String);

impl ImageData {
    pub fn from_png(bytes: &[u8]) -> Self {
        ImageData(format!("{}{}", PNG_DATA_URL_PREFIX, STANDARD.encode(bytes)))
    }

    pub fn from_data_url(url: String) -> Self {
        ImageData(url)
    }

    pub fn as_data_url(&self) -> &str {
        &self.0
    }

    /// Decodes the payload back into PNG bytes.
    pub fn png_bytes(&self) -> Result<Vec<u8>> {
        let payload = self.0.strip_prefix(PNG_DATA_URL_PREFIX).ok_or_else(|| {
            Error::LoadFailed("selfie is not a base64 PNG data URL".to_string())
        })?;
        STANDARD.decode(payload).map_err(Error::load_failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelfieRecord {
    pub key: String,
    pub image_data: ImageData,
    pub captured_at: DateTime<Utc>,
    pub owner_scope: OwnerScope,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelfieWire {
    data_url: String,
    timestamp: i64,
}

fn records_from_snapshot(snapshot: &Snapshot, scope: &OwnerScope) -> Vec<SelfieRecord> {
    snapshot
        .iter()
        .filter_map(|(key, value)| {
            match serde_json::from_value::<SelfieWire>(value.clone()) {
                Ok(wire) => Some(SelfieRecord {
                    key: key.to_string(),
                    image_data: ImageData::from_data_url(wire.data_url),
                    captured_at: Utc
                        .timestamp_millis_opt(wire.timestamp)
                        .single()
                        .unwrap_or_default(),
                    owner_scope: scope.clone(),
                }),
                Err(err) => {
                    warn!("[Gallery] Skipping selfie record {}: {}", key, err);
                    None
                }
            }
        })
        .collect()
}

pub struct SelfieSink<'a, D: RealtimeDatabase> {
    db: &'a D,
}

impl<'a, D: RealtimeDatabase> SelfieSink<'a, D> {
    pub fn new(db: &'a D) -> Self {
        SelfieSink { db }
    }

    /// Appends a record stamped with the current time. Retrying after a
    /// failure may store the selfie twice.
    pub fn save(&self, image_data: &ImageData, owner_scope: &OwnerScope) -> Result<String> {
        self.save_at(image_data, owner_scope, Utc::now())
    }

    pub fn save_at(
        &self,
        image_data: &ImageData,
        owner_scope: &OwnerScope,
        captured_at: DateTime<Utc>,
    ) -> Result<String> {
        let wire = SelfieWire {
            data_url: image_data.as_data_url().to_string(),
            timestamp: captured_at.timestamp_millis(),
        };
        let value = serde_json::to_value(&wire).map_err(Error::save_failed)?;
        match self.db.push(&owner_scope.path(), &value) {
            Ok(key) => {
                info!("[Selfie] Saved selfie {} for {}", key, owner_scope);
                Ok(key)
            }
            Err(err) => {
                error!("[Selfie] Error saving selfie for {}: {}", owner_scope, err);
                Err(Error::save_failed(err))
            }
        }
    }

    /// Selfies under `scope`. An empty admin id reads the anonymous bucket.
    pub fn list_for(&self, scope: &str) -> Result<Vec<SelfieRecord>> {
        let scope = OwnerScope::from_uid(Some(scope));
        let snapshot = self.db.get(&scope.path()).map_err(Error::into_load_failed)?;
        let records = records_from_snapshot(&snapshot, &scope);
        debug!("[Gallery] {} selfies for {}", records.len(), scope);
        Ok(records)
    }

    pub fn on_update<F>(&self, scope: &OwnerScope, mut callback: F) -> Subscription
    where
        F: FnMut(Result<Vec<SelfieRecord>>) + 'static,
    {
        let owned_scope = scope.clone();
        self.db.on_value(
            &scope.path(),
            Box::new(move |snapshot| {
                callback(snapshot.map(|s| records_from_snapshot(&s, &owned_scope)))
            }),
        )
    }
}
