//! JSON documents written via temp file + rename

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;

use crate::error::{BuilderError, Result};

/// Read a JSON document, `None` if it does not exist yet
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(BuilderError::io(path, err)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|err| BuilderError::json(path, err))
}

/// Write a JSON document so that readers see either the old or the new
/// content, never a partial file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|err| BuilderError::io(parent, err))?;

    let payload = serde_json::to_vec_pretty(value).map_err(|err| BuilderError::json(path, err))?;
    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|err| BuilderError::io(parent, err))?;
    temp.write_all(&payload)
        .map_err(|err| BuilderError::io(temp.path(), err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| BuilderError::io(temp.path(), err))?;
    temp.persist(path)
        .map_err(|err| BuilderError::io(path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn missing_document_reads_as_none() {
        let dir = tempdir().unwrap();
        let read: Option<BTreeMap<String, u32>> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn write_replaces_whole_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1u32);
        write_json_atomic(&path, &doc).unwrap();
        doc.insert("b".to_string(), 2);
        write_json_atomic(&path, &doc).unwrap();

        let read: BTreeMap<String, u32> = read_json(&path).unwrap().unwrap();
        assert_eq!(read, doc);
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1, "temp files must not be left behind");
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<BTreeMap<String, u32>>(&path).unwrap_err();
        assert_eq!(err.kind(), "corrupt-document");
    }
}
