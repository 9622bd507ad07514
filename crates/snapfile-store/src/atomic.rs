//! Atomic snapshot files.
//!
//! A snapshot is written to a hidden temporary sibling of the target, flushed
//! (and optionally fsynced), then renamed over the target. Readers see either
//! the previous snapshot or the new one, never a partial write. The temporary
//! file is removed on every failure path, so none remains once a call returns.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tracing::warn;

use crate::codec::{Codec, CodecError};
use crate::error::{Result, StoreError};

/// Encodes `value` with `codec` and atomically replaces the file at `path`.
///
/// The parent directory must already exist.
///
/// # Errors
/// - [`StoreError::TempFile`] if the temporary file cannot be created
/// - [`StoreError::Encode`] if encoding, flushing or syncing fails
/// - [`StoreError::Commit`] if the rename fails
///
/// The target is untouched in all three cases.
pub fn write_snapshot<T, C>(path: &Path, value: &T, codec: &C, sync: bool) -> Result<()>
where
    T: Serialize,
    C: Codec,
{
    let dir = parent_dir(path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());

    // Random suffix per call, no shared seed
    let mut temp_file = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|source| StoreError::TempFile {
            dir: dir.to_path_buf(),
            source,
        })?;

    let encode_err = |source: CodecError| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    };

    {
        let mut writer = BufWriter::new(temp_file.as_file_mut());
        codec.encode(value, &mut writer).map_err(encode_err)?;
        writer
            .flush()
            .map_err(|e| encode_err(CodecError::new(e)))?;
    }

    if sync {
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| encode_err(CodecError::new(e)))?;
    }

    temp_file.persist(path).map_err(|e| StoreError::Commit {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    if sync {
        if let Err(e) = sync_dir(dir) {
            // The rename already happened; only its durability is in doubt.
            warn!(dir = %dir.display(), error = %e, "failed to sync directory");
        }
    }

    Ok(())
}

/// Reads and decodes the snapshot at `path`.
///
/// Returns `Ok(None)` when the file does not exist.
///
/// # Errors
/// - [`StoreError::Load`] if the file exists but cannot be read
/// - [`StoreError::Corrupt`] if its contents do not decode
pub fn read_snapshot<T, C>(path: &Path, codec: &C) -> Result<Option<T>>
where
    T: DeserializeOwned,
    C: Codec,
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Load {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let metadata = file.metadata().map_err(|source| StoreError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.is_dir() {
        return Err(StoreError::Load {
            path: path.to_path_buf(),
            source: std::io::Error::other("is a directory"),
        });
    }

    let value = codec
        .decode(BufReader::new(file))
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Some(value))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Persists the rename itself.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::error::ErrorKind as StoreErrorKind;
    use serde::{Deserialize, Serializer};
    use std::fs;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refusing to encode"))
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn data(value: i32) -> TestData {
        TestData {
            name: "test".to_string(),
            value,
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");

        write_snapshot(&path, &data(42), &JsonCodec::new(), true).unwrap();
        let loaded: Option<TestData> = read_snapshot(&path, &JsonCodec::new()).unwrap();

        assert_eq!(loaded, Some(data(42)));
    }

    #[test]
    fn test_write_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, "original content").unwrap();

        write_snapshot(&path, &data(7), &JsonCodec::new(), false).unwrap();

        let loaded: Option<TestData> = read_snapshot(&path, &JsonCodec::new()).unwrap();
        assert_eq!(loaded, Some(data(7)));
    }

    #[test]
    fn test_no_temp_file_left_after_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");

        write_snapshot(&path, &data(1), &JsonCodec::new(), true).unwrap();

        assert_eq!(entries(dir.path()), vec!["data.json".to_string()]);
    }

    #[test]
    fn test_encode_failure_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        write_snapshot(&path, &data(1), &JsonCodec::new(), true).unwrap();
        let before = fs::read(&path).unwrap();

        let err = write_snapshot(&path, &Unencodable, &JsonCodec::new(), true).unwrap_err();

        assert_eq!(err.kind(), StoreErrorKind::EncodeFailed);
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(entries(dir.path()), vec!["data.json".to_string()]);
    }

    #[test]
    fn test_missing_directory_is_temp_file_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("data.json");

        let err = write_snapshot(&path, &data(1), &JsonCodec::new(), true).unwrap_err();

        assert_eq!(err.kind(), StoreErrorKind::TempFileCreateFailed);
        assert!(!path.exists());
    }

    #[test]
    fn test_rename_onto_directory_is_commit_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupant"), "x").unwrap();

        let err = write_snapshot(&path, &data(1), &JsonCodec::new(), true).unwrap_err();

        assert_eq!(err.kind(), StoreErrorKind::CommitFailed);
        assert!(path.is_dir());
        assert_eq!(entries(dir.path()), vec!["data.json".to_string()]);
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let result: Option<TestData> = read_snapshot(&path, &JsonCodec::new()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_read_truncated_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        write_snapshot(&path, &data(99), &JsonCodec::new(), true).unwrap();
        let content = fs::read(&path).unwrap();
        fs::write(&path, &content[..content.len() / 2]).unwrap();

        let err = read_snapshot::<TestData, _>(&path, &JsonCodec::new()).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::PersistedStateCorrupt);
    }

    #[test]
    fn test_read_directory_is_load_failure() {
        let dir = tempdir().unwrap();

        let err = read_snapshot::<TestData, _>(dir.path(), &JsonCodec::new()).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::LoadFailed);
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_dir_reports_errors() {
        let dir = tempdir().unwrap();

        sync_dir(dir.path()).unwrap();
        assert!(sync_dir(&dir.path().join("gone")).is_err());
    }
}
