//! Rotating outbound-call tokens.
//!
//! Every outbound call can carry the current token; a peer that wants to
//! verify a past call's origin asks for the token that was valid at the
//! call's timestamp. Tokens rotate once per window (an hour by default)
//! and a short bounded history of past tokens is retained for those
//! lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{self, AgentStore};

/// Configuration for token rotation.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Store key holding the token record.
    pub record_key: String,
    /// Rotation window in milliseconds.
    pub window_ms: i64,
    /// Number of historical tokens nominally retained. The record may
    /// briefly hold up to `history_size + 2` entries before eviction.
    pub history_size: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            record_key: "_tokens".to_string(),
            window_ms: 3_600_000,
            history_size: 5,
        }
    }
}

/// A token together with its issue timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// The token value.
    pub token: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
}

/// The persisted record shape: a `last` pointer plus the retained history.
///
/// `last` is metadata and never counts toward the history cap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TokenRecord {
    last: Option<String>,
    tokens: BTreeMap<String, String>,
}

/// Bounded, time-windowed rotating token history over an [`AgentStore`].
///
/// Rotation is rare and low-contention, so `create` serializes on a
/// coarse async mutex; the record write itself still goes through the CAS
/// retry loop so a concurrent writer on a shared backend cannot be
/// clobbered.
pub struct TokenStore {
    store: Arc<dyn AgentStore>,
    config: TokenConfig,
    rotation: Mutex<()>,
}

impl TokenStore {
    /// Create a token store with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self::with_config(store, TokenConfig::default())
    }

    /// Create a token store with custom configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn AgentStore>, config: TokenConfig) -> Self {
        Self {
            store,
            config,
            rotation: Mutex::new(()),
        }
    }

    /// Return the currently valid token, rotating first if the last one
    /// is missing or older than the rotation window.
    ///
    /// Two calls inside one window return the identical token.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or the record is malformed.
    pub async fn create(&self) -> StoreResult<IssuedToken> {
        let _guard = self.rotation.lock().await;

        let record = self.load().await?;
        let now = Utc::now();

        if let Some(current) = Self::still_valid(&record, now, self.config.window_ms) {
            return Ok(current);
        }

        let issued_at = now;
        let stamp = format_stamp(issued_at);
        let token = Uuid::new_v4().to_string();
        let cap = self.config.history_size.saturating_add(2);

        let record_key = self.config.record_key.clone();
        let key_in_update = record_key.clone();
        let stamp_for_update = stamp.clone();
        let token_for_update = token.clone();
        store::update(self.store.as_ref(), &record_key, move |old| {
            let mut record = decode_record(&key_in_update, old)?;
            record
                .tokens
                .insert(stamp_for_update.clone(), token_for_update.clone());
            record.last = Some(stamp_for_update.clone());
            if record.tokens.len() > cap {
                // Timestamps are fixed-width RFC 3339, so the first map key
                // is the single oldest entry.
                let oldest = record.tokens.keys().next().cloned();
                if let Some(oldest) = oldest {
                    record.tokens.remove(&oldest);
                }
            }
            Ok(serde_json::to_value(&record)?)
        })
        .await?;

        tracing::debug!(issued_at = %stamp, "rotated outbound token");
        Ok(IssuedToken { token, issued_at })
    }

    /// Exact-timestamp lookup of a historical token.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or the record is malformed.
    pub async fn get(&self, issued_at: DateTime<Utc>) -> StoreResult<Option<String>> {
        let record = self.load().await?;
        Ok(record.tokens.get(&format_stamp(issued_at)).cloned())
    }

    /// Number of historical tokens currently retained.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or the record is malformed.
    pub async fn retained(&self) -> StoreResult<usize> {
        Ok(self.load().await?.tokens.len())
    }

    async fn load(&self) -> StoreResult<TokenRecord> {
        let value = self.store.read(&self.config.record_key).await?;
        decode_record(&self.config.record_key, value.as_ref())
    }

    fn still_valid(record: &TokenRecord, now: DateTime<Utc>, window_ms: i64) -> Option<IssuedToken> {
        let last = record.last.as_deref()?;
        let token = record.tokens.get(last)?;
        let issued_at = parse_stamp(last)?;
        let age_ms = now
            .signed_duration_since(issued_at)
            .num_milliseconds();
        if age_ms <= window_ms {
            Some(IssuedToken {
                token: token.clone(),
                issued_at,
            })
        } else {
            None
        }
    }
}

/// Fixed-width RFC 3339 with microseconds, so lexicographic order over the
/// map keys is chronological order.
fn format_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn decode_record(key: &str, value: Option<&serde_json::Value>) -> StoreResult<TokenRecord> {
    match value {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|err| StoreError::malformed(key, err.to_string())),
        None => Ok(TokenRecord::default()),
    }
}
