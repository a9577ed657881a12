//! Atomic write primitives
//!
//! Uses temp→fsync→rename→fsync(dir) so a crash leaves either the old or
//! the new file, never a partial one, and the rename itself is durable

use crate::errors::{io_error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tpcdm_core::errors::TpcError;

/// Atomically replace the contents of a file
///
/// The temp file lives next to the target so the rename stays on one
/// filesystem.
///
/// # Errors
///
/// Returns `Io` naming the step that failed. The target is untouched in
/// that case and the temp file is removed on a best-effort basis.
pub fn atomic_write(target_path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("create_snapshot_dir", e))?;
    }

    let temp_path = temp_path_for(target_path)?;

    let written = write_synced(&temp_path, content);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if let Err(e) = fs::rename(&temp_path, target_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error("rename_snapshot_temp", e));
    }

    sync_parent_dir(target_path)
}

/// Flush the directory entry so the rename survives power loss
#[cfg(unix)]
fn sync_parent_dir(target_path: &Path) -> Result<()> {
    let parent = match target_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| io_error("sync_snapshot_dir", e))
}

// Directories cannot be opened as files here
#[cfg(not(unix))]
fn sync_parent_dir(_target_path: &Path) -> Result<()> {
    Ok(())
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error("create_snapshot_temp", e))?;
    file.write_all(content)
        .map_err(|e| io_error("write_snapshot_temp", e))?;
    file.sync_all()
        .map_err(|e| io_error("sync_snapshot_temp", e))?;
    Ok(())
}

/// `<name>.tmp` beside the target, keeping the original extension
fn temp_path_for(target_path: &Path) -> Result<PathBuf> {
    let file_name = target_path
        .file_name()
        .ok_or_else(|| TpcError::InvalidInput {
            reason: format!("snapshot path has no file name: {}", target_path.display()),
        })?;

    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    Ok(target_path.with_file_name(temp_name))
}
