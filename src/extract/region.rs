//! GeoJSON region input.
//!
//! A [`Region`] is parsed from a `Polygon`, `MultiPolygon`, `Feature`, or
//! `FeatureCollection` GeoJSON document and rasterized into a relevance
//! bitmap the same way [`crate::extract::BoundingBox`] is: tiles at
//! `max_zoom` are tested one at a time against the region with an even-odd
//! point-in-polygon fill, then [`super::bbox::generalize_or`] adds parent
//! tiles down to `min_zoom`.

use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use roaring::RoaringTreemap;

use crate::extract::bbox::generalize_or;
use crate::extract::BoundingBox;
use crate::tile::{TileCoord, TileId};
use crate::{PmtError, PmtResult};

fn polygons_from_geojson(geojson: &geojson::GeoJson) -> PmtResult<Vec<Polygon<f64>>> {
    let collection = geojson::quick_collection(geojson)
        .map_err(|e| PmtError::InvalidRegion(e.to_string()))?;
    let mut polygons = Vec::new();
    for geometry in collection {
        match geometry {
            Geometry::Polygon(polygon) => polygons.push(polygon),
            Geometry::MultiPolygon(multi) => polygons.extend(multi.0),
            _ => {}
        }
    }
    Ok(polygons)
}

/// A geographic region to extract, backed by one or more polygons.
#[derive(Debug, Clone)]
pub struct Region {
    polygons: MultiPolygon<f64>,
}

impl Region {
    /// Parses a region from a GeoJSON document: a bare `Polygon`/`MultiPolygon`
    /// geometry, a `Feature` wrapping one, or a `FeatureCollection` of them.
    ///
    /// # Errors
    /// Returns [`PmtError::InvalidRegion`] if the document isn't valid GeoJSON,
    /// or contains no polygon geometry.
    pub fn from_geojson_str(input: &str) -> PmtResult<Self> {
        let geojson: geojson::GeoJson = input
            .parse()
            .map_err(|e: geojson::Error| PmtError::InvalidRegion(e.to_string()))?;

        let polygons = polygons_from_geojson(&geojson)?;
        if polygons.is_empty() {
            return Err(PmtError::InvalidRegion(
                "no Polygon or MultiPolygon geometry found".to_string(),
            ));
        }
        Ok(Self {
            polygons: MultiPolygon::new(polygons),
        })
    }

    /// Computes a bitmap of every tile at `max_zoom` whose center falls
    /// inside the region (even-odd rule), then generalizes upward to include
    /// ancestor tiles down to `min_zoom`, mirroring
    /// [`crate::extract::BoundingBox::tile_bitmap`].
    ///
    /// # Errors
    /// Returns an error if the region's bounds don't map to valid tile
    /// coordinates at `max_zoom`.
    pub fn tile_bitmap(&self, min_zoom: u8, max_zoom: u8) -> PmtResult<RoaringTreemap> {
        let mut bitmap = RoaringTreemap::new();
        let (min_lon, min_lat, max_lon, max_lat) = self.bounds()?;

        let min_tile = TileCoord::from_lon_lat_zoom(min_lon, max_lat, max_zoom)?;
        let max_tile = TileCoord::from_lon_lat_zoom(max_lon, min_lat, max_zoom)?;

        for y in min_tile.y()..=max_tile.y() {
            for x in min_tile.x()..=max_tile.x() {
                let Ok(coord) = TileCoord::new(max_zoom, u64::from(x), u64::from(y)) else {
                    continue;
                };
                let (lon, lat) = coord.center_lon_lat();
                if self.contains_point(lon, lat) {
                    bitmap.insert(TileId::from(coord).value());
                }
            }
        }

        generalize_or(&mut bitmap, min_zoom)?;
        Ok(bitmap)
    }

    /// The axis-aligned bounding box covering every polygon in the region,
    /// used both internally (to bound the tile-scan loop) and to populate a
    /// new archive's header bounds after a region-based extraction.
    ///
    /// # Errors
    /// Returns an error if the region has no usable coordinates.
    pub fn bounding_box(&self) -> PmtResult<BoundingBox> {
        let (min_lon, min_lat, max_lon, max_lat) = self.bounds()?;
        Ok(BoundingBox::from_nesw(max_lat, max_lon, min_lat, min_lon))
    }

    fn bounds(&self) -> PmtResult<(f64, f64, f64, f64)> {
        let mut min_lon = f64::INFINITY;
        let mut min_lat = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        let mut max_lat = f64::NEG_INFINITY;

        for polygon in &self.polygons.0 {
            for coord in polygon.exterior().coords() {
                min_lon = min_lon.min(coord.x);
                max_lon = max_lon.max(coord.x);
                min_lat = min_lat.min(coord.y);
                max_lat = max_lat.max(coord.y);
            }
        }

        if !min_lon.is_finite() || !min_lat.is_finite() {
            return Err(PmtError::InvalidRegion(
                "region has no usable coordinates".to_string(),
            ));
        }
        Ok((min_lon, min_lat, max_lon, max_lat))
    }

    fn contains_point(&self, lon: f64, lat: f64) -> bool {
        self.polygons
            .0
            .iter()
            .any(|polygon| polygon_contains(polygon, lon, lat))
    }
}

/// Even-odd point-in-polygon test: the exterior ring counts, each interior
/// (hole) ring flips the result back out.
fn polygon_contains(polygon: &Polygon<f64>, x: f64, y: f64) -> bool {
    let mut inside = ring_contains(polygon.exterior(), x, y);
    for interior in polygon.interiors() {
        if ring_contains(interior, x, y) {
            inside = !inside;
        }
    }
    inside
}

fn ring_contains(ring: &LineString<f64>, x: f64, y: f64) -> bool {
    let coords: &[Coord<f64>] = ring.0.as_slice();
    let n = coords.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (coords[i].x, coords[i].y);
        let (xj, yj) = (coords[j].x, coords[j].y);
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{
        "type": "Polygon",
        "coordinates": [[[-122.5, 37.7], [-122.5, 37.8], [-122.4, 37.8], [-122.4, 37.7], [-122.5, 37.7]]]
    }"#;

    #[test]
    fn parses_bare_polygon() {
        let region = Region::from_geojson_str(SQUARE).unwrap();
        assert_eq!(region.polygons.0.len(), 1);
    }

    #[test]
    fn parses_feature_collection() {
        let doc = format!(
            r#"{{"type": "FeatureCollection", "features": [{{"type": "Feature", "properties": {{}}, "geometry": {SQUARE}}}]}}"#
        );
        let region = Region::from_geojson_str(&doc).unwrap();
        assert_eq!(region.polygons.0.len(), 1);
    }

    #[test]
    fn rejects_non_polygon_geometry() {
        let point = r#"{"type": "Point", "coordinates": [-122.4, 37.8]}"#;
        assert!(Region::from_geojson_str(point).is_err());
    }

    #[test]
    fn tile_bitmap_contains_center_tile() {
        let region = Region::from_geojson_str(SQUARE).unwrap();
        let bitmap = region.tile_bitmap(10, 12).unwrap();
        assert!(!bitmap.is_empty());
    }

    #[test]
    fn even_odd_rule_excludes_hole() {
        let outer: Vec<Coord<f64>> = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 0.0, y: 10.0 },
            Coord { x: 10.0, y: 10.0 },
            Coord { x: 10.0, y: 0.0 },
            Coord { x: 0.0, y: 0.0 },
        ];
        let hole: Vec<Coord<f64>> = vec![
            Coord { x: 3.0, y: 3.0 },
            Coord { x: 3.0, y: 7.0 },
            Coord { x: 7.0, y: 7.0 },
            Coord { x: 7.0, y: 3.0 },
            Coord { x: 3.0, y: 3.0 },
        ];
        let polygon = Polygon::new(LineString::new(outer), vec![LineString::new(hole)]);
        assert!(polygon_contains(&polygon, 1.0, 1.0));
        assert!(!polygon_contains(&polygon, 5.0, 5.0));
    }
}
