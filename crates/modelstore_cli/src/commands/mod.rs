//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use modelstore_core::engine::{verify_log, LogHeader};
use modelstore_core::{EncryptionKey, Engine, Snapshot, StoreConfig, Value};
use std::path::Path;
use tracing::debug;

/// How to unlock an encrypted store.
pub struct Unlock {
    /// Passphrase, if one was given.
    pub passphrase: Option<String>,
    /// Salt for passphrase derivation.
    pub salt: String,
}

/// Replays an existing store read-only, taking its schema version from the
/// log header. The file is never written, even when its tail is torn.
pub fn open_store(
    path: &Path,
    unlock: &Unlock,
) -> Result<(Snapshot, LogHeader), Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    let report = verify_log(&std::fs::read(path)?)?;
    let header = report.header.ok_or("Log has no header frame")?;
    debug!(
        schema_version = header.schema_version,
        encrypted = header.encrypted,
        "read log header"
    );

    let mut config = StoreConfig::file(path)
        .create_if_missing(false)
        .sync_on_commit(false)
        .schema_version(header.schema_version);
    if header.encrypted {
        let passphrase = unlock
            .passphrase
            .as_deref()
            .ok_or("Store is encrypted; pass --passphrase")?;
        config = config.encryption_key(EncryptionKey::derive_from_passphrase(
            passphrase.as_bytes(),
            unlock.salt.as_bytes(),
        )?);
    }
    Ok((Engine::read_snapshot(&config)?, header))
}

/// Renders a stored value as JSON. Bytes become lowercase hex.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(record) => Json::Object(
            record
                .iter()
                .map(|(name, value)| (name.clone(), value_to_json(value)))
                .collect(),
        ),
    }
}
