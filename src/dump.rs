//! Best-effort human-readable dumps via an external `dtc`.

use std::fs;
use std::path::Path;
use std::process::Command;

use crate::{DtbPatchError, Result};

/// Decompile `blob` to device tree source at `out_path` by running
/// `dtc -I dtb -O dts`.
///
/// This is diagnostic output only: callers are expected to downgrade any
/// error (dtc missing, non-zero exit) to a warning, and the patch flow never
/// depends on it succeeding.
pub fn dump_dts(blob: &[u8], out_path: &Path) -> Result<()> {
    let tmp = std::env::temp_dir().join(format!("dtbpatch-{}.dtb", std::process::id()));
    fs::write(&tmp, blob)?;

    let status = Command::new("dtc")
        .args(["-I", "dtb", "-O", "dts", "-o"])
        .arg(out_path)
        .arg(&tmp)
        .status();
    let _ = fs::remove_file(&tmp);

    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(DtbPatchError::Other(format!("dtc exited with {s}"))),
        Err(e) => Err(DtbPatchError::Other(format!("failed to run dtc: {e}"))),
    }
}
