//! Dump command implementation.

use super::{open_store, value_to_json, Unlock};
use modelstore_core::{Snapshot, Value};
use std::path::Path;

/// Runs the dump command, printing one JSON object per record.
pub fn run(
    path: &Path,
    unlock: &Unlock,
    collection: Option<&str>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (snapshot, _) = open_store(path, unlock)?;
    if let Some(name) = collection {
        if snapshot.table(name).is_none() {
            return Err(format!("No collection named {name}").into());
        }
    }
    for line in dump_lines(&snapshot, collection, limit) {
        println!("{line}");
    }
    Ok(())
}

/// Renders the selected records, in collection then insertion order.
pub fn dump_lines(
    snapshot: &Snapshot,
    collection: Option<&str>,
    limit: Option<usize>,
) -> Vec<serde_json::Value> {
    let mut lines = Vec::new();
    for name in snapshot.collections() {
        if collection.is_some_and(|wanted| wanted != name) {
            continue;
        }
        let Some(table) = snapshot.table(name) else {
            continue;
        };
        for (row, record) in table.rows().take(limit.unwrap_or(usize::MAX)) {
            lines.push(serde_json::json!({
                "collection": name,
                "row": row.as_u64(),
                "record": value_to_json(&Value::Map(record.clone())),
            }));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::{CoreResult, Persistable, PersistableExt, Record, StoreConfig, StoreContext};
    use serde_json::json;
    use tempfile::tempdir;

    struct Tag {
        label: String,
    }

    impl Persistable for Tag {
        const COLLECTION: &'static str = "tags";
        const FIELDS: &'static [&'static str] = &["label"];

        fn to_record(&self) -> Record {
            Record::new().with("label", self.label.as_str())
        }

        fn from_record(record: &Record) -> CoreResult<Self> {
            Ok(Self {
                label: record.text("label")?.to_string(),
            })
        }
    }

    #[test]
    fn dump_respects_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tags.mslog");
        let ctx = StoreContext::new(StoreConfig::file(&path)).unwrap();
        let tags: Vec<_> = ["red", "green", "blue"]
            .into_iter()
            .map(|label| Tag {
                label: label.to_string(),
            })
            .collect();
        Tag::save_all(&ctx, &tags).unwrap();
        ctx.close().unwrap();

        let unlock = Unlock {
            passphrase: None,
            salt: String::new(),
        };
        let (snapshot, _) = open_store(&path, &unlock).unwrap();

        let lines = dump_lines(&snapshot, Some("tags"), Some(2));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["record"], json!({"label": "red"}));
        assert_eq!(lines[1]["record"], json!({"label": "green"}));
        assert!(dump_lines(&snapshot, Some("other"), None).is_empty());
    }
}
