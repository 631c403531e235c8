//! Port file publishing
//!
//! Other local processes learn the forwarded port by reading a file that holds
//! the decimal port number. The file is replaced atomically so a reader sees
//! either the previous value or the new one, never a partial write. No file
//! means no active lease.

use crate::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sink for the currently active public port
pub trait PortPublisher {
    /// Make `port` the published port
    fn publish(&mut self, port: u16) -> Result<()>;

    /// Withdraw the published port
    fn clear(&mut self) -> Result<()>;
}

/// [`PortPublisher`] that writes a file shared with other local processes
#[derive(Debug, Clone)]
pub struct PortFilePublisher {
    path: PathBuf,
}

impl PortFilePublisher {
    /// Create a publisher for the port file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read the currently published port
    ///
    /// Returns `Ok(None)` if the file is absent or empty.
    pub fn read_port(&self) -> Result<Option<u16>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let trimmed = data.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        trimmed
            .parse()
            .map(Some)
            .map_err(|e| Error::Publish(format!("Invalid port file contents {:?}: {}", trimmed, e)))
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl PortPublisher for PortFilePublisher {
    fn publish(&mut self, port: u16) -> Result<()> {
        // Temp file must live in the same directory for the rename to be atomic
        let mut tmp = tempfile::NamedTempFile::new_in(self.directory())
            .map_err(|e| Error::Publish(format!("Failed to create temp file: {}", e)))?;

        tmp.write_all(port.to_string().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::Publish(format!("Failed to write port: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(|e| Error::Publish(format!("Failed to set permissions: {}", e)))?;
        }

        tmp.persist(&self.path).map_err(|e| {
            Error::Publish(format!("Failed to replace {}: {}", self.path.display(), e.error))
        })?;

        info!("Port {} saved to {}", port, self.path.display());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed port file: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Port file {} already absent", self.path.display());
                Ok(())
            }
            Err(e) => Err(Error::Publish(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
