use std::path::{Path, PathBuf};

use log::info;
use tokio::fs::{self, File};
use tokio::io::{self, AsyncWriteExt, BufReader, BufWriter};

use crate::error::RangeError;

/// Concatenate `parts` in order into `output`, optionally deleting the parts.
///
/// Returns the number of bytes written.
pub async fn merge_parts(
    output: &Path,
    parts: &[PathBuf],
    cleanup: bool,
) -> Result<u64, RangeError> {
    let file = File::create(output)
        .await
        .map_err(|e| RangeError::io(output, e))?;
    let mut writer = BufWriter::new(file);
    let mut total: u64 = 0;

    for part in parts {
        let source = File::open(part)
            .await
            .map_err(|e| RangeError::io(part, e))?;
        let mut reader = BufReader::new(source);
        total += io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| RangeError::io(output, e))?;
    }

    writer
        .flush()
        .await
        .map_err(|e| RangeError::io(output, e))?;

    if cleanup {
        for part in parts {
            fs::remove_file(part)
                .await
                .map_err(|e| RangeError::io(part, e))?;
        }
    }

    info!(
        "merge_parts: {} parts={} total_bytes={}",
        output.display(),
        parts.len(),
        total
    );
    Ok(total)
}
