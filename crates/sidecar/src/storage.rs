//! Credential file
//!
//! Writes the serialized token to a well-known path for the co-located
//! workload. Every write replaces the whole file by renaming a fully written
//! sibling over it, so a reader sees either the previous token or the new
//! one and never a partial write.
//!
//! The parent directory must already exist (usually a shared `emptyDir`).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::errors::RenewalError;

/// Default file mode: readable by a workload running under another UID.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Destination for the current credential.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
    mode: u32,
}

impl CredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: DEFAULT_FILE_MODE,
        }
    }

    /// Set the Unix permission bits applied on every write.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Replace the file contents with `credential`'s token bytes.
    pub fn write(&self, credential: &Credential) -> Result<(), RenewalError> {
        let staging = self.staging_path();

        let result = self
            .write_staging(&staging, credential.token().as_bytes())
            .and_then(|()| fs::rename(&staging, &self.path));

        if let Err(source) = result {
            if staging.exists() {
                if let Err(e) = fs::remove_file(&staging) {
                    warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
                }
            }
            return Err(RenewalError::PersistFailed {
                path: self.path.clone(),
                source,
            });
        }

        info!(
            path = %self.path.display(),
            subject = %credential.subject(),
            expiry = %credential.expiry(),
            "Credential written"
        );
        Ok(())
    }

    fn write_staging(&self, staging: &Path, bytes: &[u8]) -> std::io::Result<()> {
        // A write interrupted before the rename leaves its staging file
        // behind, possibly without owner-write
        match fs::remove_file(staging) {
            Ok(()) => debug!(path = %staging.display(), "Removed stale staging file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.mode);
        }

        let mut file: File = options.open(staging)?;
        file.write_all(bytes)?;

        // The umask may have narrowed the mode passed to open()
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(self.mode))?;
        }

        file.sync_all()?;
        debug!(path = %staging.display(), bytes = bytes.len(), "Staged credential");
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "credential".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}
