//! Helpers for the file based stores.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

const LOCK_FILE_NAME: &str = ".lock";


//------------ Writing -------------------------------------------------------

/// Creates the given directory and its parents if necessary.
pub fn create_dirs(path: &Path) -> Result<(), FileError> {
    fs::create_dir_all(path).map_err(|err| {
        FileError::io(
            format!("Failed to create directory '{}'", path.display()),
            err,
        )
    })
}

/// Writes content to a temporary file in `tmp_dir` and then moves it to
/// `path`, so readers never see a partially written file.
pub fn save_atomic(
    tmp_dir: &Path,
    path: &Path,
    content: &[u8],
) -> Result<(), FileError> {
    if let Some(parent) = path.parent() {
        create_dirs(parent)?;
    }

    let mut tmp_file = NamedTempFile::new_in(tmp_dir).map_err(|err| {
        FileError::io(
            format!("writing temp file failed for '{}'", path.display()),
            err,
        )
    })?;
    tmp_file.write_all(content).map_err(|err| {
        FileError::io(
            format!(
                "failed to write temp file '{}'",
                tmp_file.path().display()
            ),
            err,
        )
    })?;

    tmp_file.persist(path).map_err(|err| {
        FileError::io(
            format!(
                "failed to rename temp file '{}' to '{}'",
                err.file.path().display(),
                path.display()
            ),
            err.error,
        )
    })?;

    Ok(())
}

/// Like [`save_atomic`] but never replaces an existing file. Returns
/// whether the file was created.
///
/// The file appears with its full content or not at all, so it can serve
/// as an exclusive claim that readers can check without a lock.
pub fn save_new(
    tmp_dir: &Path,
    path: &Path,
    content: &[u8],
) -> Result<bool, FileError> {
    if let Some(parent) = path.parent() {
        create_dirs(parent)?;
    }

    let mut tmp_file = NamedTempFile::new_in(tmp_dir).map_err(|err| {
        FileError::io(
            format!("writing temp file failed for '{}'", path.display()),
            err,
        )
    })?;
    tmp_file.write_all(content).map_err(|err| {
        FileError::io(
            format!(
                "failed to write temp file '{}'",
                tmp_file.path().display()
            ),
            err,
        )
    })?;

    match tmp_file.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(FileError::io(
            format!(
                "failed to move temp file '{}' to '{}'",
                err.file.path().display(),
                path.display()
            ),
            err.error,
        )),
    }
}

pub fn save_json<T: Serialize>(
    tmp_dir: &Path,
    path: &Path,
    value: &T,
) -> Result<(), FileError> {
    let json = serde_json::to_vec_pretty(value).map_err(|err| {
        FileError::Json(format!("cannot serialize '{}'", path.display()), err)
    })?;
    save_atomic(tmp_dir, path, &json)
}

/// Removes a file, returning whether it existed.
pub fn remove_file(path: &Path) -> Result<bool, FileError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(FileError::io(
            format!("failed to delete '{}'", path.display()),
            err,
        )),
    }
}


//------------ Reading -------------------------------------------------------

/// Reads a file, returning `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, FileError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(FileError::io(
            format!("failed to read '{}'", path.display()),
            err,
        )),
    }
}

pub fn load_json<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, FileError> {
    match read_optional(path)? {
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            FileError::Json(format!("cannot parse '{}'", path.display()), err)
        }),
        None => Ok(None),
    }
}

/// The names of the entries in a directory, empty if it does not exist.
pub fn dir_entry_names(path: &Path) -> Result<Vec<String>, FileError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(vec![]);
        }
        Err(err) => {
            return Err(FileError::io(
                format!("failed to list '{}'", path.display()),
                err,
            ));
        }
    };

    let mut res = vec![];
    for entry in entries {
        let entry = entry.map_err(|err| {
            FileError::io(format!("failed to list '{}'", path.display()), err)
        })?;
        if let Some(name) = entry.file_name().to_str() {
            res.push(name.to_string());
        }
    }
    Ok(res)
}


//------------ FileLock ------------------------------------------------------

/// An advisory lock on a directory, shared with other processes using the
/// same store.
#[derive(Debug)]
pub struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    pub fn create(dir: &Path) -> Result<Self, FileError> {
        create_dirs(dir)?;
        let lock_path = dir.join(LOCK_FILE_NAME);

        let mut options = OpenOptions::new();
        options.create(true).truncate(false).read(true).write(true);
        let lock_file = options.open(&lock_path).map_err(|err| {
            FileError::io(
                format!("failed to open lock file '{}'", lock_path.display()),
                err,
            )
        })?;

        Ok(FileLock { lock: fd_lock::RwLock::new(lock_file) })
    }

    pub fn write(
        &mut self,
    ) -> Result<fd_lock::RwLockWriteGuard<'_, File>, FileError> {
        self.lock
            .write()
            .map_err(|err| FileError::io("Cannot get file lock", err))
    }
}


//------------ FileError -----------------------------------------------------

#[derive(Debug)]
pub enum FileError {
    Io(String, io::Error),
    Json(String, serde_json::Error),
}

impl FileError {
    pub fn io(context: impl Into<String>, err: io::Error) -> Self {
        FileError::Io(context.into(), err)
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileError::Io(context, err) => write!(f, "{}: {}", context, err),
            FileError::Json(context, err) => write!(f, "{}: {}", context, err),
        }
    }
}

impl std::error::Error for FileError {}


/// The directory for temporary files below a store root.
pub fn tmp_dir(root: &Path) -> PathBuf {
    root.join(".tmp")
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = tmp_dir(dir.path());
        create_dirs(&tmp).unwrap();

        let path = dir.path().join("a/b/value.json");
        save_json(&tmp, &path, &vec![1, 2, 3]).unwrap();
        let value: Option<Vec<u32>> = load_json(&path).unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        assert!(remove_file(&path).unwrap());
        assert!(!remove_file(&path).unwrap());
        assert!(read_optional(&path).unwrap().is_none());
    }

    #[test]
    fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(dir_entry_names(&dir.path().join("nope")).unwrap().is_empty());
    }
}
