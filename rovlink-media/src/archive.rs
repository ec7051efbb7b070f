//! Chunk archive export
//!
//! Packs a chunk group into ZIP archives for transporting unfinished
//! recordings between machines. Large groups are split across parts at a
//! fixed byte threshold so no single archive outgrows practical memory and
//! filesystem limits; the telemetry side-file, when present, travels in the
//! first part only.

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::info;

use crate::chunk_group::{ChunkGroup, StoredChunk};
use crate::error::{VideoProcessingError, VideoResult};
use crate::storage::ChunkStorage;

/// Maximum cumulative chunk size per archive part (1 GiB)
pub const ARCHIVE_PART_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Export a chunk group into one or more archive parts under
/// `destination_dir`, named `<base_name>.zip` or `<base_name>_part<N>.zip`
/// when the group splits. Returns the part paths in order.
pub async fn export_group(
    storage: &ChunkStorage,
    group: &ChunkGroup,
    telemetry_file: Option<&Path>,
    destination_dir: &Path,
    base_name: &str,
) -> VideoResult<Vec<PathBuf>> {
    export_group_with_limit(
        storage,
        group,
        telemetry_file,
        destination_dir,
        base_name,
        ARCHIVE_PART_MAX_BYTES,
    )
    .await
}

/// [`export_group`] with an explicit part-size limit
pub async fn export_group_with_limit(
    storage: &ChunkStorage,
    group: &ChunkGroup,
    telemetry_file: Option<&Path>,
    destination_dir: &Path,
    base_name: &str,
    part_max_bytes: u64,
) -> VideoResult<Vec<PathBuf>> {
    if group.chunks.is_empty() {
        return Err(VideoProcessingError::Archive {
            reason: format!("chunk group {} is empty", group.hash),
        });
    }

    tokio::fs::create_dir_all(destination_dir).await?;
    let partitions = partition_by_size(&group.chunks, part_max_bytes);
    let multi_part = partitions.len() > 1;

    let mut part_paths = Vec::with_capacity(partitions.len());
    for (index, partition) in partitions.iter().enumerate() {
        let part_name = if multi_part {
            format!("{base_name}_part{}.zip", index + 1)
        } else {
            format!("{base_name}.zip")
        };
        let part_path = destination_dir.join(part_name);

        let mut entries: Vec<(String, Bytes)> = Vec::with_capacity(partition.len() + 1);
        if index == 0 {
            if let Some(telemetry) = telemetry_file {
                let name = telemetry
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{base_name}.ass"));
                let payload = tokio::fs::read(telemetry).await?;
                entries.push((name, Bytes::from(payload)));
            }
        }
        for chunk in partition {
            entries.push((chunk.key.clone(), storage.get(&chunk.key).await?));
        }

        let write_path = part_path.clone();
        tokio::task::spawn_blocking(move || write_archive_blocking(&write_path, entries))
            .await
            .map_err(|e| VideoProcessingError::Archive {
                reason: format!("archive task failed: {e}"),
            })??;

        part_paths.push(part_path);
    }

    info!(
        hash = %group.hash,
        parts = part_paths.len(),
        total_size = group.total_size,
        "chunk group exported"
    );
    Ok(part_paths)
}

fn partition_by_size<'a>(chunks: &'a [StoredChunk], max_bytes: u64) -> Vec<Vec<&'a StoredChunk>> {
    let mut partitions = Vec::new();
    let mut current: Vec<&StoredChunk> = Vec::new();
    let mut current_size = 0u64;

    for chunk in chunks {
        if !current.is_empty() && current_size + chunk.size > max_bytes {
            partitions.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += chunk.size;
        current.push(chunk);
    }
    if !current.is_empty() {
        partitions.push(current);
    }
    partitions
}

fn write_archive_blocking(path: &Path, entries: Vec<(String, Bytes)>) -> VideoResult<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = zip::ZipWriter::new(file);
    // media payloads do not deflate; store them as-is
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .large_file(true);

    for (name, payload) in entries {
        writer
            .start_file(name, options)
            .map_err(|e| VideoProcessingError::Archive {
                reason: format!("failed to start archive entry: {e}"),
            })?;
        writer.write_all(&payload)?;
    }
    writer.finish().map_err(|e| VideoProcessingError::Archive {
        reason: format!("failed to finish archive: {e}"),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(sequence: u64, size: u64) -> StoredChunk {
        StoredChunk {
            key: format!("hash_{sequence}"),
            sequence,
            size,
            modified_at: None,
        }
    }

    #[test]
    fn test_partition_respects_size_limit() {
        let chunks = vec![chunk(0, 400), chunk(1, 400), chunk(2, 400)];
        let partitions = partition_by_size(&chunks, 1000);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].len(), 2);
        assert_eq!(partitions[1].len(), 1);
    }

    #[test]
    fn test_partition_keeps_small_groups_whole() {
        let chunks = vec![chunk(0, 10), chunk(1, 10)];
        let partitions = partition_by_size(&chunks, 1000);
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].len(), 2);
    }

    #[test]
    fn test_oversized_chunk_gets_its_own_part() {
        let chunks = vec![chunk(0, 10), chunk(1, 5000), chunk(2, 10)];
        let partitions = partition_by_size(&chunks, 1000);
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[1][0].sequence, 1);
    }
}
