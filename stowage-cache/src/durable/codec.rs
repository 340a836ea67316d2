//! Durable entry format: `[stored_at millis: i64 LE, 8 bytes][json value]`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stowage_core::CacheError;

const TIMESTAMP_LEN: usize = 8;

/// A value read back from the durable tier with its write time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
}

impl<V> StoredEntry<V> {
    /// Whether the entry is older than `ttl`. A zero ttl never goes stale.
    pub fn is_stale(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        if ttl.is_zero() {
            return false;
        }
        match (now - self.stored_at).to_std() {
            Ok(age) => age > ttl,
            // Stored in the future (clock skew): treat as fresh.
            Err(_) => false,
        }
    }
}

/// Serialize `value` with its write time.
pub fn encode_entry<V: Serialize>(
    key: &str,
    value: &V,
    stored_at: DateTime<Utc>,
) -> Result<Vec<u8>, CacheError> {
    let json = serde_json::to_vec(value).map_err(|e| CacheError::EncodeFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(TIMESTAMP_LEN + json.len());
    bytes.extend_from_slice(&stored_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Parse bytes written by [`encode_entry`].
pub fn decode_entry<V: DeserializeOwned>(
    key: &str,
    bytes: &[u8],
) -> Result<StoredEntry<V>, CacheError> {
    let decode_failed = |reason: String| CacheError::DecodeFailed {
        key: key.to_string(),
        reason,
    };

    let (timestamp, json) = bytes
        .split_first_chunk::<TIMESTAMP_LEN>()
        .ok_or_else(|| decode_failed(format!("entry is {} bytes, too short", bytes.len())))?;

    let millis = i64::from_le_bytes(*timestamp);
    let stored_at = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| decode_failed(format!("timestamp {millis} out of range")))?;
    let value = serde_json::from_slice(json).map_err(|e| decode_failed(e.to_string()))?;

    Ok(StoredEntry { value, stored_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decode_reads_timestamp_and_value() {
        let stored_at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let bytes = encode_entry("k", &vec!["a".to_string(), "b".to_string()], stored_at).unwrap();

        assert_eq!(&bytes[..8], &1_700_000_000_123i64.to_le_bytes());
        let entry: StoredEntry<Vec<String>> = decode_entry("k", &bytes).unwrap();
        assert_eq!(entry.stored_at, stored_at);
        assert_eq!(entry.value, vec!["a", "b"]);
    }

    #[test]
    fn test_short_or_garbled_input_is_a_decode_error() {
        assert!(matches!(
            decode_entry::<u32>("k", &[1, 2, 3]),
            Err(CacheError::DecodeFailed { .. })
        ));

        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{not json");
        assert!(matches!(
            decode_entry::<u32>("k", &bytes),
            Err(CacheError::DecodeFailed { .. })
        ));
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let entry = StoredEntry {
            value: 1u8,
            stored_at: now - chrono::Duration::seconds(30),
        };
        assert!(entry.is_stale(Duration::from_secs(10), now));
        assert!(!entry.is_stale(Duration::from_secs(60), now));
        assert!(!entry.is_stale(Duration::ZERO, now));
    }
}
