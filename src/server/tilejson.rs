//! Compose a `TileJSON` document from a header and its metadata blob.

use tilejson::{Bounds, Center, TileJSON, VectorLayer};

use crate::header::Header;

/// Builds a `TileJSON` document for an archive reachable at `public_url/name`.
///
/// `metadata` is the archive's raw metadata JSON (already decompressed).
/// Unrecognized top-level string fields in `metadata` (`attribution`,
/// `description`, `name`, `version`) are passed through; a `vector_layers`
/// array, if present, is parsed into typed entries.
#[must_use]
pub fn build_tilejson(header: &Header, metadata: &serde_json::Value, name: &str, public_url: &str) -> TileJSON {
    let ext = super::router::tile_extension(header.tile_type);
    let tiles = vec![format!(
        "{}/{name}/{{z}}/{{x}}/{{y}}.{ext}",
        public_url.trim_end_matches('/')
    )];

    let vector_layers = metadata
        .get("vector_layers")
        .and_then(|v| serde_json::from_value::<Vec<VectorLayer>>(v.clone()).ok());

    let str_field = |key: &str| metadata.get(key).and_then(|v| v.as_str()).map(str::to_string);

    TileJSON {
        tilejson: "3.0.0".to_string(),
        tiles,
        vector_layers,
        attribution: str_field("attribution"),
        description: str_field("description"),
        name: str_field("name"),
        version: str_field("version"),
        scheme: Some("xyz".to_string()),
        bounds: Some(Bounds::new(
            header.min_longitude,
            header.min_latitude,
            header.max_longitude,
            header.max_latitude,
        )),
        center: Some(Center::new(
            header.center_longitude,
            header.center_latitude,
            header.center_zoom,
        )),
        minzoom: Some(header.min_zoom),
        maxzoom: Some(header.max_zoom),
        ..TileJSON::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Compression, TileType};

    #[test]
    fn builds_expected_shape() {
        let mut header = Header::new(Compression::Gzip, TileType::Mvt);
        header.min_zoom = 0;
        header.max_zoom = 14;
        header.center_zoom = 4;
        header.min_longitude = -10.0;
        header.min_latitude = -20.0;
        header.max_longitude = 10.0;
        header.max_latitude = 20.0;

        let metadata = serde_json::json!({
            "name": "demo",
            "attribution": "© someone",
        });

        let doc = build_tilejson(&header, &metadata, "demo", "https://example.com/tiles");
        assert_eq!(doc.tilejson, "3.0.0");
        assert_eq!(doc.tiles, vec!["https://example.com/tiles/demo/{z}/{x}/{y}.mvt"]);
        assert_eq!(doc.name.as_deref(), Some("demo"));
        assert_eq!(doc.minzoom, Some(0));
        assert_eq!(doc.maxzoom, Some(14));
    }
}
