use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Whole-cache snapshot serializer.
pub trait SnapshotCodec: Send + Sync {
    fn serialize_to_text<T: Serialize>(&self, value: &T) -> Result<String>;

    fn deserialize_from_text<T: DeserializeOwned>(&self, text: &str) -> Result<T>;

    fn serialize_to_file<T: Serialize>(&self, value: &T, path: &Path) -> Result<()> {
        let contents = self.serialize_to_text(value)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn deserialize_from_file<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let contents = std::fs::read_to_string(path)?;
        self.deserialize_from_text(&contents)
    }
}

/// Pretty-printed JSON snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl SnapshotCodec for JsonCodec {
    fn serialize_to_text<T: Serialize>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(value)?)
    }

    fn deserialize_from_text<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheError;

    #[test]
    fn test_file_round_trip_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("values.json");

        JsonCodec.serialize_to_file(&vec![1, 2, 3], &path).unwrap();
        let back: Vec<i32> = JsonCodec.deserialize_from_file(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn test_bad_text_is_serialization_error() {
        let result: Result<Vec<i32>> = JsonCodec.deserialize_from_text("[1, 2,");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
