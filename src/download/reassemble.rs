//! Reassembly of staged segments into the destination file.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use super::DownloadError;
use super::segment::StagedSegment;

/// Writes every staged segment into `destination` at its start offset.
///
/// Segments are copied in ascending id order. The destination directory is
/// created if needed and any previous file content is truncated. All scratch
/// files are deleted before returning, whether or not the copy succeeded.
///
/// # Errors
///
/// Returns [`DownloadError::Reassembly`] for any disk error on either side of
/// the copy.
#[instrument(level = "debug", skip(segments), fields(destination = %destination.display(), segments = segments.len()))]
pub async fn reassemble(
    destination: &Path,
    mut segments: Vec<StagedSegment>,
) -> Result<u64, DownloadError> {
    segments.sort_by_key(|segment| segment.range.id);

    let result = copy_segments(destination, &segments).await;
    discard_scratch_files(segments);

    if let Ok(total) = &result {
        debug!(bytes = total, "reassembly complete");
    }
    result
}

async fn copy_segments(destination: &Path, segments: &[StagedSegment]) -> Result<u64, DownloadError> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::reassembly(parent, e))?;
    }

    let mut output = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)
        .await
        .map_err(|e| DownloadError::reassembly(destination, e))?;

    let mut total = 0_u64;
    for segment in segments {
        output
            .seek(std::io::SeekFrom::Start(segment.range.start))
            .await
            .map_err(|e| DownloadError::reassembly(destination, e))?;

        let scratch: &Path = &segment.temp_path;
        let mut input = File::open(scratch)
            .await
            .map_err(|e| DownloadError::reassembly(scratch, e))?;
        let copied = tokio::io::copy(&mut input, &mut output)
            .await
            .map_err(|e| DownloadError::reassembly(destination, e))?;

        debug!(
            segment = segment.range.id,
            offset = segment.range.start,
            bytes = copied,
            "segment copied"
        );
        total += copied;
    }

    output
        .flush()
        .await
        .map_err(|e| DownloadError::reassembly(destination, e))?;
    Ok(total)
}

fn discard_scratch_files(segments: Vec<StagedSegment>) {
    for segment in segments {
        let path: PathBuf = segment.temp_path.to_path_buf();
        if let Err(e) = segment.temp_path.close() {
            warn!(path = %path.display(), error = %e, "failed to delete scratch file");
        }
    }
}
