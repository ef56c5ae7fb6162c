//! Atomic JSON export of collected records

use crate::model::Record;
use crate::HarvestError;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes `records` to `path` as a pretty-printed JSON array
///
/// The array is written to a temporary file in the same directory and then
/// renamed over `path`, so readers never observe a partial export.
pub fn export_json(records: &[Record], path: &Path) -> Result<(), HarvestError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("export path {} has no file name", path.display()),
            )
        })?;
    let temp = dir.join(format!(".{}.tmp", file_name));

    let written = write_records(records, &temp);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    fs::rename(&temp, path)?;
    tracing::info!("Exported {} records to {}", records.len(), path.display());
    Ok(())
}

fn write_records(records: &[Record], path: &Path) -> Result<(), HarvestError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Reads an export written by [`export_json`]
pub fn load_json(path: &Path) -> Result<Vec<Record>, HarvestError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
