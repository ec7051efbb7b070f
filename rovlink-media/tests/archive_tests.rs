//! Archive export/import tests: part splitting, telemetry placement, numeric
//! group ordering and extraction through the streaming muxer.

use std::sync::Arc;

use rovlink_media::{
    collect_groups, export_group_with_limit, ChunkSink, ChunkStorage, StreamingMuxer,
    StreamingMuxerConfig,
};

async fn open_storage() -> (tempfile::TempDir, Arc<ChunkStorage>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(ChunkStorage::open(dir.path()).await.expect("open storage"));
    (dir, storage)
}

fn archive_entry_names(path: &std::path::Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    (0..archive.len())
        .map(|index| {
            archive
                .by_index(index)
                .expect("archive entry")
                .name()
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_group_ordering_is_numeric_not_lexicographic() {
    let (_dir, storage) = open_storage().await;
    for sequence in [2u64, 0, 10, 1] {
        storage
            .put(&ChunkStorage::chunk_key("hash", sequence), b"x")
            .await
            .expect("seed chunk");
    }
    // non-chunk keys must not produce groups
    storage.put("thumbnail_video", b"t").await.expect("seed");
    storage.put("stray-file", b"s").await.expect("seed");

    let groups = collect_groups(&storage).await.expect("collect");
    assert_eq!(groups.len(), 1);

    let group = groups.get("hash").expect("group");
    let sequences: Vec<u64> = group.chunks.iter().map(|chunk| chunk.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 10]);
    assert_eq!(group.total_size, 4);
}

#[tokio::test]
async fn test_export_splits_parts_and_attaches_telemetry_to_the_first() {
    let (_dir, storage) = open_storage().await;
    for sequence in 0..3u64 {
        storage
            .put(&ChunkStorage::chunk_key("hash", sequence), &[0u8; 400])
            .await
            .expect("seed chunk");
    }

    let telemetry_dir = tempfile::tempdir().expect("tempdir");
    let telemetry = telemetry_dir.path().join("dive.ass");
    tokio::fs::write(&telemetry, "overlay").await.expect("write telemetry");

    let groups = collect_groups(&storage).await.expect("collect");
    let group = groups.get("hash").expect("group");

    let destination = tempfile::tempdir().expect("tempdir");
    let parts = export_group_with_limit(
        &storage,
        group,
        Some(&telemetry),
        destination.path(),
        "dive",
        1000,
    )
    .await
    .expect("export");

    assert_eq!(parts.len(), 2);
    assert!(parts[0].ends_with("dive_part1.zip"));
    assert!(parts[1].ends_with("dive_part2.zip"));

    let first_names = archive_entry_names(&parts[0]);
    assert_eq!(first_names, vec!["dive.ass", "hash_0", "hash_1"]);
    let second_names = archive_entry_names(&parts[1]);
    assert_eq!(second_names, vec!["hash_2"]);
}

#[tokio::test]
async fn test_small_group_exports_as_a_single_part() {
    let (_dir, storage) = open_storage().await;
    storage
        .put(&ChunkStorage::chunk_key("hash", 0), b"tiny")
        .await
        .expect("seed chunk");

    let groups = collect_groups(&storage).await.expect("collect");
    let group = groups.get("hash").expect("group");

    let destination = tempfile::tempdir().expect("tempdir");
    let parts = export_group_with_limit(&storage, group, None, destination.path(), "dive", 1000)
        .await
        .expect("export");

    assert_eq!(parts.len(), 1);
    assert!(parts[0].ends_with("dive.zip"));
    assert_eq!(archive_entry_names(&parts[0]), vec!["hash_0"]);
}

#[tokio::test]
async fn test_exported_part_round_trips_through_muxer_extraction() {
    let (_dir, storage) = open_storage().await;
    for sequence in 0..3u64 {
        storage
            .put(
                &ChunkStorage::chunk_key("hash", sequence),
                format!("chunk-{sequence}").as_bytes(),
            )
            .await
            .expect("seed chunk");
    }

    let telemetry_dir = tempfile::tempdir().expect("tempdir");
    let telemetry = telemetry_dir.path().join("dive.ass");
    tokio::fs::write(&telemetry, "overlay").await.expect("write telemetry");

    let groups = collect_groups(&storage).await.expect("collect");
    let group = groups.get("hash").expect("group");

    let destination = tempfile::tempdir().expect("tempdir");
    let parts = export_group_with_limit(
        &storage,
        group,
        Some(&telemetry),
        destination.path(),
        "dive_part1",
        u64::MAX,
    )
    .await
    .expect("export");
    assert_eq!(parts.len(), 1);

    let muxer = StreamingMuxer::new(StreamingMuxerConfig::new(destination.path()));
    let extracted = muxer
        .extract_video_chunks_zip(&parts[0])
        .await
        .expect("extract");

    assert_eq!(extracted.hash, "hash");
    assert_eq!(extracted.file_name, "dive");
    assert_eq!(extracted.chunk_paths.len(), 3);
    let telemetry_path = extracted
        .telemetry_file_path
        .as_ref()
        .expect("telemetry extracted");
    let overlay = tokio::fs::read_to_string(telemetry_path)
        .await
        .expect("read overlay");
    assert_eq!(overlay, "overlay");

    let first = tokio::fs::read_to_string(&extracted.chunk_paths[0])
        .await
        .expect("read first chunk");
    assert_eq!(first, "chunk-0");

    muxer
        .cleanup_temp_dir(&extracted.temp_dir)
        .await
        .expect("cleanup");
    assert!(!extracted.temp_dir.exists());
}
