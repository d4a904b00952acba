//! Helpers for the JSON state files: atomic writes and tolerant,
//! per-entry parsing.

use std::io::Write;
use std::path::{Path, PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::Error;

/// Reads and parses a JSON file. A missing file is `Ok(None)`.
pub async fn read_json_value(path: &Path) -> Result<Option<Value>, Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Deserializes every element of the array stored under `field`, skipping
/// (and logging) elements that do not parse.
pub fn parse_entries<T: DeserializeOwned>(
    document: &Value,
    field: &str,
    source: &Path,
) -> Result<Vec<T>, Error> {
    let array = document
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Parse(format!(
            "{} has no '{}' array", source.display(), field
        )))?;

    let mut parsed = Vec::with_capacity(array.len());
    for (i, element) in array.iter().enumerate() {
        match serde_path_to_error::deserialize::<_, T>(element.clone()) {
            Ok(entry) => parsed.push(entry),
            Err(e) => {
                warn!(
                    "Skipping malformed entry #{} in {} (at '{}'): {}",
                    i,
                    source.display(),
                    e.path(),
                    e.inner()
                );
            }
        }
    }
    Ok(parsed)
}

/// Serializes `value` next to `path` and renames it into place.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let target: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| Error::persistence(path.display().to_string(), e))?
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let value = read_json_value(&dir.path().join("nope.json")).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn atomic_write_round_trips_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_json_atomic(&path, &serde_json::json!({ "a": 1 })).await.unwrap();
        write_json_atomic(&path, &serde_json::json!({ "a": 2 })).await.unwrap();

        let value = read_json_value(&path).await.unwrap().unwrap();
        assert_eq!(value["a"], 2);
        // no temp files left behind
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let doc = serde_json::json!({
            "items": [
                { "name": "ok", "count": 1 },
                { "name": "bad", "count": "many" },
                { "count": 3 },
                { "name": "also ok", "count": 4 }
            ]
        });
        let items: Vec<Item> = parse_entries(&doc, "items", Path::new("test.json")).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name, "also ok");
    }

    #[test]
    fn missing_array_is_an_error() {
        let doc = serde_json::json!({ "other": [] });
        let res: Result<Vec<Item>, _> = parse_entries(&doc, "items", Path::new("test.json"));
        assert!(res.is_err());
    }
}
