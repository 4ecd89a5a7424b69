//! End-to-end extraction tests against a small synthetic archive built with
//! the writer (no external fixtures required).

use std::io::Cursor;

use tempfile::NamedTempFile;

use crate::extract::{BoundingBox, Extractor};
use crate::header::HEADER_SIZE;
use crate::{AsyncPmTilesReader, Compression, MmapBackend, PmTilesWriter, TileCoord, TileType};

/// Builds a small clustered archive covering zooms 0-6 over the whole globe,
/// with one tile per addressed coordinate along a coarse grid, plus a
/// handful of explicit tiles over Florence, Italy so bbox tests have
/// something concrete to find.
async fn build_test_archive() -> (NamedTempFile, Vec<TileCoord>) {
    let file = NamedTempFile::with_suffix(".pmtiles").unwrap();
    let out = std::fs::File::create(file.path()).unwrap();
    let mut writer = PmTilesWriter::new(TileType::Mvt)
        .internal_compression(Compression::None)
        .max_zoom(8)
        .create(out)
        .unwrap();

    let mut coords = Vec::new();
    // Florence is roughly at zoom/x/y (8, 138, 93).
    for z in 6u8..=8 {
        let shift = 8 - z;
        let base_x = 138u64 >> shift;
        let base_y = 93u64 >> shift;
        for dx in 0..2u64 {
            for dy in 0..2u64 {
                let coord = TileCoord::new(z, base_x + dx, base_y + dy).unwrap();
                let data = vec![z, u8::try_from(dx).unwrap(), u8::try_from(dy).unwrap()];
                writer.add_tile(coord, &data).unwrap();
                coords.push(coord);
            }
        }
    }
    writer.finalize().unwrap();
    (file, coords)
}

#[tokio::test]
async fn test_extract_florence_bbox_roundtrips() {
    let (file, coords) = build_test_archive().await;

    let backend = MmapBackend::try_from(file.path()).await.unwrap();
    let reader = AsyncPmTilesReader::try_from_source(backend).await.unwrap();

    // Bounding box covering the Florence cluster of tiles.
    let bbox = BoundingBox::from_nesw(43.85, 11.35, 43.70, 11.10);

    let mut output = Cursor::new(Vec::new());
    let extractor = Extractor::new(&reader);
    let stats = extractor
        .extract_bbox_to_writer(bbox, &mut output)
        .await
        .unwrap();

    assert!(stats.addressed_tiles() > 0);
    assert!(stats.addressed_tiles() as usize <= coords.len());

    let output_bytes = output.into_inner();
    assert!(
        output_bytes.len() >= HEADER_SIZE,
        "output should have a full header"
    );
    assert_eq!(&output_bytes[0..7], b"PMTiles", "should have magic bytes");

    let temp_dir = tempfile::tempdir().unwrap();
    let temp_path = temp_dir.path().join("extracted.pmtiles");
    std::fs::write(&temp_path, &output_bytes).unwrap();

    let extracted_backend = MmapBackend::try_from(&temp_path).await.unwrap();
    let extracted_reader = AsyncPmTilesReader::try_from_source(extracted_backend)
        .await
        .unwrap();

    let header = extracted_reader.get_header();
    assert!(header.clustered(), "extracted archive should be clustered");
    assert_eq!(
        stats.addressed_tiles(),
        header.n_tile_entries().unwrap(),
        "plan entries should match header"
    );
}

#[tokio::test]
async fn test_extract_with_zoom_range() {
    let (file, _coords) = build_test_archive().await;

    let backend = MmapBackend::try_from(file.path()).await.unwrap();
    let reader = AsyncPmTilesReader::try_from_source(backend).await.unwrap();

    let bbox = BoundingBox::from_nesw(43.85, 11.35, 43.70, 11.10);

    let mut output = Cursor::new(Vec::new());
    let extractor = Extractor::new(&reader).min_zoom(6).max_zoom(7);
    let stats = extractor
        .extract_bbox_to_writer(bbox, &mut output)
        .await
        .unwrap();
    assert!(stats.addressed_tiles() > 0);

    let output_bytes = output.into_inner();
    let temp_dir = tempfile::tempdir().unwrap();
    let temp_path = temp_dir.path().join("extracted.pmtiles");
    std::fs::write(&temp_path, &output_bytes).unwrap();

    let extracted_backend = MmapBackend::try_from(&temp_path).await.unwrap();
    let extracted_reader = AsyncPmTilesReader::try_from_source(extracted_backend)
        .await
        .unwrap();

    let header = extracted_reader.get_header();
    assert!(header.min_zoom >= 6, "min zoom should be at least 6");
    assert!(header.max_zoom <= 7, "max zoom should be at most 7");
}

#[tokio::test]
async fn test_extract_overfetch_reduces_requests() {
    let (file, _coords) = build_test_archive().await;
    let bbox = BoundingBox::from_nesw(43.85, 11.35, 43.70, 11.10);

    let stats_low = {
        let backend = MmapBackend::try_from(file.path()).await.unwrap();
        let reader = AsyncPmTilesReader::try_from_source(backend).await.unwrap();
        let mut output = Cursor::new(Vec::new());
        Extractor::new(&reader)
            .overfetch(0.0)
            .extract_bbox_to_writer(bbox, &mut output)
            .await
            .unwrap()
    };

    let stats_high = {
        let backend = MmapBackend::try_from(file.path()).await.unwrap();
        let reader = AsyncPmTilesReader::try_from_source(backend).await.unwrap();
        let mut output = Cursor::new(Vec::new());
        Extractor::new(&reader)
            .overfetch(1.0)
            .extract_bbox_to_writer(bbox, &mut output)
            .await
            .unwrap()
    };

    assert!(
        stats_high.num_tile_reqs() <= stats_low.num_tile_reqs(),
        "higher overfetch should not increase request count: low={} high={}",
        stats_low.num_tile_reqs(),
        stats_high.num_tile_reqs()
    );
    assert_eq!(
        stats_low.addressed_tiles(),
        stats_high.addressed_tiles(),
        "should extract the same number of tiles regardless of overfetch"
    );
}
