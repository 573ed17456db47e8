//! Persistent per-installation identity: one UUID, generated on first run
//! and reused for every announcement afterwards.

use std::io;
use std::path::{Path, PathBuf};

use lanlink_core::PeerId;
use tracing::{info, warn};

/// Default location of the identity file.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lanlink/identity")
}

/// Read the stored UUID, or generate and persist a new one. An unparsable
/// file is replaced rather than treated as fatal.
pub fn load_or_create(path: &Path) -> io::Result<PeerId> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        match contents.trim().parse::<PeerId>() {
            Ok(id) => return Ok(id),
            Err(e) => warn!(path = %path.display(), error = %e, "replacing corrupt identity file"),
        }
    }
    let id = PeerId::random();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{id}\n"))?;
    info!(%id, path = %path.display(), "generated new installation identity");
    Ok(id)
}
