//! Embedded transport (`unix://`): local RPC over a unix domain socket.
//!
//! The socket lives at the URL path. A socket file left behind by a dead
//! server is removed before binding. A socket some other server still
//! listens on, or any other kind of file at that path, makes the bind fail.

use super::TransportError;
use crate::address::ConnectionAddress;
use crate::error::{Result, ScreenlinkError};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

fn socket_path(address: &ConnectionAddress) -> Option<PathBuf> {
    if address.path().is_empty() {
        None
    } else {
        Some(PathBuf::from(address.path()))
    }
}

pub async fn connect(
    address: &ConnectionAddress,
) -> std::result::Result<UnixStream, TransportError> {
    let path = socket_path(address)
        .ok_or_else(|| TransportError::connect(address, "no socket path given"))?;
    let stream = UnixStream::connect(&path)
        .await
        .map_err(|e| TransportError::connect(address, e))?;
    debug!("Embedded channel connected to {}", path.display());
    Ok(stream)
}

/// Remove `path` if it is a socket nobody listens on.
///
/// Returns whether something was removed. A socket that still accepts
/// connections is left in place and reported as `AddrInUse`.
fn remove_stale_socket(path: &Path) -> std::io::Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "another server is listening on this socket",
                ));
            }
            std::fs::remove_file(path)?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// The socket file a server created, identified by device and inode.
#[derive(Debug)]
pub struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketFile {
    fn record(path: PathBuf) -> std::io::Result<Self> {
        let meta = std::fs::symlink_metadata(&path)?;
        Ok(Self {
            path,
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file if it is still the one this server bound.
    ///
    /// A file another server has since put at the same path is left alone.
    pub fn remove_if_owned(&self) -> std::io::Result<bool> {
        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.dev() == self.dev && meta.ino() == self.ino => {
                std::fs::remove_file(&self.path)?;
                Ok(true)
            }
            Ok(_) => {
                debug!("Socket {} was replaced, leaving it", self.path.display());
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Bind a listener at the address path.
///
/// Must be called from within a tokio runtime.
pub fn bind(address: &ConnectionAddress) -> Result<(UnixListener, SocketFile)> {
    let path = socket_path(address).ok_or_else(|| ScreenlinkError::Validation {
        field: "location".to_string(),
        message: format!("{} has no socket path", address),
    })?;

    match remove_stale_socket(&path) {
        Ok(true) => warn!("Removed stale socket {}", path.display()),
        Ok(false) => {}
        Err(e) => return Err(ScreenlinkError::bind(address.to_string(), e)),
    }

    let listener =
        UnixListener::bind(&path).map_err(|e| ScreenlinkError::bind(address.to_string(), e))?;
    let file = SocketFile::record(path)?;
    Ok((listener, file))
}
