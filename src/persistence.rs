//! # Snapshot / restore
//!
//! An optional facility for persisting a [`TokenCache`]'s entries to disk
//! as a stream of length-prefixed records and restoring them later.
//! Restricted to the opaque-bearer [`AccessToken`] variant: the record
//! format stores only a provider name, an opaque string payload, and an
//! expiry, which is exactly `AccessToken`'s shape; `ArtifactRegistryCredentials`
//! and `RestConfig` carry structured, provider-specific fields that do not
//! fit this record without inventing a schema (see `DESIGN.md` for this
//! decision), so persistence for those stays out of scope here.
//!
//! Format: for each entry, a length-prefixed `key`, a length-prefixed
//! `provider` name, `expires_at_unix_nanos: i64 LE`, and a length-prefixed
//! `value` (the token's opaque string payload) — each length prefix is
//! `u32 LE` followed by that many bytes. Restoring re-derives each entry's
//! monotonic renewal deadline from the wall-clock expiry relative to the
//! moment of restore, never trusting a persisted monotonic timestamp
//! across process restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::cache::TokenCache;
use crate::token::AccessToken;

/// Persistence is an ambient, optional facility layered on top of the core
/// pipeline's error taxonomy rather than part of it (§7 names no
/// persistence-specific error kind), so failures here are reported as
/// plain `anyhow::Error` instead of [`crate::error::Error`].
pub type Result<T> = anyhow::Result<T>;

struct Record {
    key: String,
    provider: String,
    token: String,
    expires_at: DateTime<Utc>,
}

fn encode_record(record: &Record) -> Vec<u8> {
    let mut out = Vec::new();
    write_len_prefixed(&mut out, record.key.as_bytes());
    write_len_prefixed(&mut out, record.provider.as_bytes());
    out.extend_from_slice(&record.expires_at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    write_len_prefixed(&mut out, record.token.as_bytes());
    out
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
}

fn decode_records(bytes: &[u8]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let key = read_len_prefixed(bytes, &mut cursor)?;
        let provider = read_len_prefixed(bytes, &mut cursor)?;
        let nanos_bytes = read_exact(bytes, &mut cursor, 8)?;
        let nanos = i64::from_le_bytes(
            nanos_bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("truncated expiry field in snapshot record"))?,
        );
        let token = read_len_prefixed(bytes, &mut cursor)?;
        let expires_at = DateTime::from_timestamp_nanos(nanos);
        records.push(Record {
            key: String::from_utf8(key)?,
            provider: String::from_utf8(provider)?,
            token: String::from_utf8(token)?,
            expires_at,
        });
    }
    Ok(records)
}

fn read_exact<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| anyhow::anyhow!("snapshot record length overflowed"))?;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| anyhow::anyhow!("truncated snapshot record"))?;
    *cursor = end;
    Ok(slice)
}

fn read_len_prefixed(bytes: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    let len_bytes = read_exact(bytes, cursor, 4)?;
    let len = u32::from_le_bytes(len_bytes.try_into().expect("read_exact returned 4 bytes")) as usize;
    Ok(read_exact(bytes, cursor, len)?.to_vec())
}

/// Write every entry currently in `cache` to `path`, atomically (write to
/// a sibling temp file, then rename over `path`).
pub async fn snapshot(cache: &TokenCache<AccessToken>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let keys = cache.list_keys().await;

    let mut buffer = Vec::new();
    for key in keys {
        if let Some(token) = cache.get(&key).await {
            buffer.extend_from_slice(&encode_record(&Record {
                key,
                provider: token.provider.clone(),
                token: token.token.clone(),
                expires_at: token.expires_at,
            }));
        }
    }

    let tmp_path = tmp_path_for(path);
    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create snapshot temp file {tmp_path:?}: {e}"))?;
    file.write_all(&buffer)
        .await
        .map_err(|e| anyhow::anyhow!("failed to write snapshot temp file {tmp_path:?}: {e}"))?;
    file.sync_all().await.ok();
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to rename snapshot into place at {path:?}: {e}"))?;
    Ok(())
}

/// Load every entry from `path` into `cache`, skipping entries whose
/// persisted expiry is already in the past.
pub async fn restore(cache: &TokenCache<AccessToken>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read snapshot file {path:?}: {e}"))?;
    let records = decode_records(&bytes)?;
    let now = Utc::now();
    for record in records {
        if record.expires_at <= now {
            continue;
        }
        cache
            .set(
                record.key,
                AccessToken::new(record.provider, record.token, record.expires_at),
            )
            .await;
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::time::Duration;

    #[tokio::test]
    async fn snapshot_then_restore_round_trips_unexpired_entries() {
        let dir = std::env::temp_dir().join(format!(
            "wib-persistence-test-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("snapshot.bin");

        let original = TokenCache::new(8, Duration::from_secs(3600));
        original
            .set(
                "key-a".to_string(),
                AccessToken::new("mock", "token-a", Utc::now() + TimeDelta::seconds(600)),
            )
            .await;
        snapshot(&original, &path).await.unwrap();

        let restored = TokenCache::new(8, Duration::from_secs(3600));
        restore(&restored, &path).await.unwrap();
        let token = restored.get("key-a").await.unwrap();
        assert_eq!(token.token, "token-a");

        fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn restore_skips_already_expired_entries() {
        let dir = std::env::temp_dir().join(format!(
            "wib-persistence-test-expired-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("snapshot.bin");

        let bytes = encode_record(&Record {
            key: "stale".to_string(),
            provider: "mock".to_string(),
            token: "t".to_string(),
            expires_at: Utc::now() - TimeDelta::seconds(10),
        });
        fs::write(&path, bytes).await.unwrap();

        let restored = TokenCache::new(8, Duration::from_secs(3600));
        restore(&restored, &path).await.unwrap();
        assert!(restored.get("stale").await.is_none());

        fs::remove_dir_all(&dir).await.ok();
    }
}
