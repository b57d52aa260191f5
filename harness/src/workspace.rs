//! Per-run ephemeral storage.
//!
//! Every validation run gets a private directory under the configured parent
//! (normally `/tmp`). The directory holds the proxy config, the proxy's error
//! log and its pid file. The directory name and the pid file name are drawn
//! from the caller's random source so independent runs sharing a parent never
//! collide. The whole tree is removed when the workspace is released or
//! dropped, whichever happens first.

use std::fs::DirBuilder;
use std::fs::OpenOptions;
use std::fs::Permissions;
use std::io;
use std::io::Write;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use rand::Rng;
use tracing::debug;
use tracing::warn;

use crate::error::HarnessError;

const ROOT_PREFIX: &str = "proxycheck-";
const NAME_LEN: usize = 16;
const MAX_CREATE_ATTEMPTS: usize = 8;
const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const CONFIG_FILE_NAME: &str = "nginx.conf";
const ERROR_LOG_FILE_NAME: &str = "error.log";

/// Returns `len` ASCII letters drawn from `rng`.
pub fn random_name<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(NAME_ALPHABET[rng.random_range(0..NAME_ALPHABET.len())]))
        .collect()
}

#[derive(Debug)]
pub struct RunWorkspace {
    root: PathBuf,
    config_path: PathBuf,
    error_log_path: PathBuf,
    pid_file_path: PathBuf,
    released: bool,
}

impl RunWorkspace {
    /// Creates a fresh root under `parent`.
    pub fn acquire<R: Rng>(parent: &Path, rng: &mut R) -> Result<Self, HarnessError> {
        let root = create_unique_root(parent, rng)?;
        let pid_file_path = root.join(format!("{}.pid", random_name(rng, NAME_LEN)));
        let workspace = Self {
            config_path: root.join(CONFIG_FILE_NAME),
            error_log_path: root.join(ERROR_LOG_FILE_NAME),
            pid_file_path,
            root,
            released: false,
        };
        debug!(root = %workspace.root.display(), "acquired run workspace");
        Ok(workspace)
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn error_log_path(&self) -> &Path {
        &self.error_log_path
    }

    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file_path
    }

    /// Writes the proxy configuration world-readable so a proxy that drops
    /// privileges can still load it. The mode is set explicitly because the
    /// process umask may be stricter than `0644`.
    pub fn write_config(&self, contents: &str) -> Result<(), HarnessError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&self.config_path)
            .map_err(|err| HarnessError::resource(&self.config_path, err))?;
        file.set_permissions(Permissions::from_mode(0o644))
            .and_then(|()| file.write_all(contents.as_bytes()))
            .and_then(|()| file.flush())
            .map_err(|err| HarnessError::resource(&self.config_path, err))
    }

    /// Current contents of the error log. A missing or unreadable log is
    /// reported as `None`.
    pub fn read_error_log(&self) -> Option<String> {
        match std::fs::read(&self.error_log_path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                debug!(
                    path = %self.error_log_path.display(),
                    error = %err,
                    "error log unavailable"
                );
                None
            }
        }
    }

    /// Removes the workspace tree. Safe to call more than once; failures are
    /// logged and otherwise ignored.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "released run workspace"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                root = %self.root.display(),
                error = %err,
                "failed to remove run workspace"
            ),
        }
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        self.release();
    }
}

fn create_unique_root<R: Rng>(parent: &Path, rng: &mut R) -> Result<PathBuf, HarnessError> {
    let mut builder = DirBuilder::new();
    builder.mode(0o755);
    for _ in 0..MAX_CREATE_ATTEMPTS {
        let candidate = parent.join(format!("{ROOT_PREFIX}{}", random_name(rng, NAME_LEN)));
        match builder.create(&candidate) {
            Ok(()) => {
                if let Err(err) = std::fs::set_permissions(&candidate, Permissions::from_mode(0o755))
                {
                    let _ = std::fs::remove_dir(&candidate);
                    return Err(HarnessError::resource(candidate, err));
                }
                return Ok(candidate);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(HarnessError::resource(candidate, err)),
        }
    }
    Err(HarnessError::resource(
        parent,
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no unused name after {MAX_CREATE_ATTEMPTS} attempts"),
        ),
    ))
}
