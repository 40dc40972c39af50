//! Temp-file-then-rename wrapper shared by every local write path.

use std::path::Path;

use log::debug;
use tempfile::{Builder, TempPath};

use crate::error::{WriteError, WritePhase};

/// Run `body` against a temp file in the destination's directory, renaming
/// to `dest` only on success.
///
/// The temp file lives next to the destination so the final rename never
/// crosses a filesystem. On any failure the temp path is dropped, which
/// deletes the file, and the error is re-raised with `strategy` and `phase`
/// attached; the destination is guaranteed absent afterward. Interrupting
/// the process mid-write leaves at worst an orphaned temp file, never a
/// partial destination.
pub fn atomic_write<T>(
    strategy: &'static str,
    phase: WritePhase,
    dest: &Path,
    body: impl FnOnce(&Path) -> Result<T, WriteError>,
) -> Result<T, WriteError> {
    let temp = stage_path(dest).map_err(|e| e.in_phase(strategy, phase))?;
    debug!("{strategy}: writing via temp file {}", temp.display());

    let out = body(&temp).map_err(|e| e.in_phase(strategy, phase))?;

    temp.persist(dest)
        .map_err(|e| WriteError::Io(e.error).in_phase(strategy, WritePhase::Finalize))?;
    debug!("{strategy}: finalized {}", dest.display());
    Ok(out)
}

/// A closed temp path in the same directory as `dest`, deleted on drop.
fn stage_path(dest: &Path) -> Result<TempPath, WriteError> {
    let dir = dest.parent().filter(|p| !p.as_os_str().is_empty());
    let file = match dir {
        Some(dir) => Builder::new().suffix(".parquet.tmp").tempfile_in(dir)?,
        None => Builder::new().suffix(".parquet.tmp").tempfile_in(".")?,
    };
    Ok(file.into_temp_path())
}
