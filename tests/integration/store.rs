use crate::*;

use fractal_services::testing::RecordingConsumer;
use fractal_services::{
    DeliveryMode, DirReader, LoadError, ManifestResolver, ReadError, ResolveError,
};

// ══════════════════════════════════════════════════════════════════════════════
//  Directory store — chunks on disk, sites from a manifest file
// ══════════════════════════════════════════════════════════════════════════════

fn write_manifest(dir: &Path, sites: &[(&str, &SiteInfo)]) -> Result<PathBuf> {
    let mut resolver = ManifestResolver::new();
    for (id, site) in sites {
        resolver.insert(*id, (*site).clone());
    }
    let path = dir.join("sites.json");
    std::fs::write(&path, resolver.to_json()?).context("write manifest")?;
    Ok(path)
}

#[tokio::test(start_paused = true)]
async fn test_load_site_from_disk() -> Result<()> {
    let tmp = TempDir::new("disk");
    let chunks = tmp.path().join("chunks");
    let content = patterned(82_000, 51);
    let site = write_tree(&chunks, &content, 15_000, 3, ContentKind::Document)?;
    let manifest = write_manifest(tmp.path(), &[("paper", &site)])?;

    let resolver = ManifestResolver::from_path(&manifest)?;
    let loader = quiet_loader(DirReader::new(&chunks), LoaderConfig::default());
    let mut consumer = RecordingConsumer::new();
    let outcome = loader.load_site(&resolver, "paper", &mut consumer).await?;

    assert_eq!(outcome.content, content);
    assert_eq!(outcome.leaves, 6);
    assert_eq!(outcome.mode, DeliveryMode::Whole);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_streams_segments_from_disk() -> Result<()> {
    let tmp = TempDir::new("disk-stream");
    let parts = vec![
        ("init", patterned(1_200, 52)),
        ("media", patterned(30_000, 53)),
        ("media", patterned(12_345, 54)),
    ];
    let content = fractal_services::testing::segmented_content(&parts);
    let site = write_tree(tmp.path(), &content, 15_000, 2, ContentKind::Audio)?;
    let mut resolver = ManifestResolver::new();
    resolver.insert("song", site);

    let loader = quiet_loader(DirReader::new(tmp.path()), LoaderConfig::default());
    let mut consumer = RecordingConsumer::new();
    let outcome = loader.load_site(&resolver, "song", &mut consumer).await?;

    assert_eq!(outcome.mode, DeliveryMode::Segmented { segments: 3 });
    assert_eq!(outcome.content, content);
    let expected: Vec<u8> = parts.iter().flat_map(|(_, d)| d.iter().copied()).collect();
    assert_eq!(consumer.joined(), expected);
    Ok(())
}

#[tokio::test]
async fn test_dir_reader_reports_missing_chunk() -> Result<()> {
    let tmp = TempDir::new("missing");
    let present = write_chunk(tmp.path(), b"present")?;
    let absent = Address::for_payload(b"absent");
    let reader = DirReader::new(tmp.path());

    assert_eq!(reader.read(&present).await?, Bytes::from_static(b"present"));
    assert!(matches!(
        reader.read(&absent).await,
        Err(ReadError::NotFound(a)) if a == absent
    ));

    let slots = reader.read_batch(&[present, absent]).await?;
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].decode()?, Bytes::from_static(b"present"));
    assert!(!slots[1].success);
    assert_eq!(reader.count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_deleted_chunk_fails_the_load() -> Result<()> {
    let tmp = TempDir::new("deleted");
    let content = patterned(40_000, 55);
    let site = write_tree(tmp.path(), &content, 15_000, 3, ContentKind::Image)?;
    let reader = DirReader::new(tmp.path());
    let victim = Address::for_payload(&content[15_000..30_000]);
    std::fs::remove_file(reader.chunk_path(&victim))?;

    let err = quiet_loader(reader, LoaderConfig::default())
        .load(&site)
        .await
        .unwrap_err();
    match err {
        LoadError::PermanentLeafFailure { count, indices } => {
            assert_eq!(count, 1);
            assert_eq!(indices, vec![1]);
        }
        other => panic!("expected permanent failure, got {other}"),
    }
    Ok(())
}

#[test]
fn test_manifest_errors_name_the_file() {
    let tmp = TempDir::new("manifest");
    let missing = tmp.path().join("nope.json");
    let err = ManifestResolver::from_path(&missing).unwrap_err();
    assert!(matches!(err, ResolveError::Read { .. }));
    assert!(err.to_string().contains("nope.json"));

    let garbage = tmp.path().join("garbage.json");
    std::fs::write(&garbage, b"{ not json").unwrap();
    let err = ManifestResolver::from_path(&garbage).unwrap_err();
    assert!(matches!(err, ResolveError::Parse { .. }));
}
