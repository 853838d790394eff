//! Flat-file token storage
//!
//! Each field is a small file named after the field inside one working
//! directory; authorization is "does the `code` file exist". There is no
//! locking: concurrent writers race, last write wins.
//!
//! Writes are staged to hidden `.<field>.tmp` files and renamed into place,
//! so a reader never sees a half-written value and a batch that fails while
//! staging changes nothing. Only a failing rename, within the same
//! directory, can leave a batch partly applied.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{Field, TokenStore};
use crate::error::{Error, Result};

/// Token store writing one file per field.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// The directory is created on first write, not here.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, field: Field) -> PathBuf {
        self.dir.join(field.key())
    }

    fn staging_path(&self, field: Field) -> PathBuf {
        self.dir.join(format!(".{}.tmp", field.key()))
    }
}

/// Write a file readable by its owner only (unix).
fn write_private(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value.as_bytes())
        .map_err(|e| Error::Io(format!("writing {}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Io(format!("setting permissions on {}: {e}", path.display())))?;
    }

    Ok(())
}

impl TokenStore for FileStore {
    fn get(&self, field: Field) -> Option<String> {
        let path = self.path(field);
        match fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read token field, treating as unset");
                None
            }
        }
    }

    fn set(&self, field: Field, value: &str) -> Result<()> {
        self.set_all(&[(field, value)])
    }

    /// Every value is first written to a hidden staging file next to its
    /// target; only when all of them are on disk are they renamed into
    /// place. A failed staging write removes the staged files and leaves
    /// the previous values untouched.
    fn set_all(&self, values: &[(Field, &str)]) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Io(format!("creating token directory {}: {e}", self.dir.display()))
        })?;

        let mut staged = Vec::with_capacity(values.len());
        for (field, value) in values {
            let staging = self.staging_path(*field);
            if let Err(e) = write_private(&staging, value) {
                let _ = fs::remove_file(&staging);
                for (_, path) in &staged {
                    let _ = fs::remove_file(path);
                }
                return Err(e);
            }
            staged.push((*field, staging));
        }

        for (field, staging) in staged {
            let path = self.path(field);
            fs::rename(&staging, &path).map_err(|e| {
                Error::Io(format!("moving {} into place: {e}", path.display()))
            })?;
            debug!(field = field.key(), path = %path.display(), "persisted token field");
        }
        Ok(())
    }

    fn is_authorized(&self) -> bool {
        self.path(Field::Code).exists()
    }
}
