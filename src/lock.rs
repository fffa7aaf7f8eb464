use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tracing::{debug, info};

use crate::error::GdcError;

/// Exclusive interprocess lock on `<program_dir>/.<stage>.lock`, held until
/// dropped. Acquisition blocks while another process holds it.
#[derive(Debug)]
pub struct StageLock {
    file: File,
    path: PathBuf,
}

impl StageLock {
    pub fn acquire(program_dir: &Path, stage: &str) -> Result<Self, GdcError> {
        fs::create_dir_all(program_dir).map_err(|err| GdcError::Lock {
            path: program_dir.to_path_buf(),
            message: err.to_string(),
        })?;
        let path = program_dir.join(format!(".{stage}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| GdcError::Lock {
                path: path.clone(),
                message: err.to_string(),
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                info!(lock = %path.display(), "lock busy, waiting");
                file.lock_exclusive().map_err(|err| GdcError::Lock {
                    path: path.clone(),
                    message: err.to_string(),
                })?;
            }
            Err(err) => {
                return Err(GdcError::Lock {
                    path,
                    message: err.to_string(),
                });
            }
        }
        debug!(lock = %path.display(), "lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StageLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "lock released");
    }
}
