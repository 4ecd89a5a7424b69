#![allow(clippy::unreadable_literal)]

//! Hilbert-curve tile addressing.
//!
//! `PMTiles` addresses every tile in the pyramid with a single `u64`: the zoom's
//! base id (the count of tiles at all lower zooms) plus the tile's position
//! along a Hilbert curve that fully traverses the zoom level before moving on
//! to the next. See go-pmtiles `pmtiles/tile.go` for the reference algorithm
//! this is a port of.

use crate::error::PmtError;

/// Largest zoom level `PMTiles` tile ids can address (x, y must fit in a u32).
pub const MAX_ZOOM: u8 = 31;

/// The pre-computed base id (count of all tiles at lower zooms) for each zoom level.
///
/// ```
/// # use pmtiles::PYRAMID_SIZE_BY_ZOOM;
/// let mut size_at_level = 0_u64;
/// for z in 0..PYRAMID_SIZE_BY_ZOOM.len() {
///     assert_eq!(PYRAMID_SIZE_BY_ZOOM[z], size_at_level, "Invalid value at zoom {z}");
///     size_at_level += 4_u64.pow(z as u32);
/// }
/// ```
pub const PYRAMID_SIZE_BY_ZOOM: [u64; 33] = [
    /*  0 */ 0,
    /*  1 */ 1,
    /*  2 */ 5,
    /*  3 */ 21,
    /*  4 */ 85,
    /*  5 */ 341,
    /*  6 */ 1365,
    /*  7 */ 5461,
    /*  8 */ 21845,
    /*  9 */ 87381,
    /* 10 */ 349525,
    /* 11 */ 1398101,
    /* 12 */ 5592405,
    /* 13 */ 22369621,
    /* 14 */ 89478485,
    /* 15 */ 357913941,
    /* 16 */ 1431655765,
    /* 17 */ 5726623061,
    /* 18 */ 22906492245,
    /* 19 */ 91625968981,
    /* 20 */ 366503875925,
    /* 21 */ 1466015503701,
    /* 22 */ 5864062014805,
    /* 23 */ 23456248059221,
    /* 24 */ 93824992236885,
    /* 25 */ 375299968947541,
    /* 26 */ 1501199875790165,
    /* 27 */ 6004799503160661,
    /* 28 */ 24019198012642645,
    /* 29 */ 96076792050570581,
    /* 30 */ 384307168202282325,
    /* 31 */ 1537228672809129301,
    // this is the largest possible value because at z32 (base + 4^32) will overflow u64
    /* 32 */ 6148914691236517205,
];

/// The largest tile id that can occur in a valid archive (one past the last
/// id at [`MAX_ZOOM`]).
pub const MAX_TILE_ID: u64 = PYRAMID_SIZE_BY_ZOOM[MAX_ZOOM as usize + 1] - 1;

/// Given a zoom level, get the base id for that zoom level.
#[must_use]
pub fn base_id_for_zoom(z: u8) -> Option<u64> {
    PYRAMID_SIZE_BY_ZOOM.get(usize::from(z)).copied()
}

/// A decoded `(z, x, y)` tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    z: u8,
    x: u32,
    y: u32,
}

impl TileCoord {
    /// Creates a new tile coordinate, validating that `z <= MAX_ZOOM` and that
    /// `x`/`y` are within `[0, 2^z)`.
    ///
    /// # Errors
    /// Returns [`PmtError::InvalidHeader`] if the coordinate is out of range.
    pub fn new(z: u8, x: u64, y: u64) -> Result<Self, PmtError> {
        if z > MAX_ZOOM {
            return Err(PmtError::InvalidHeader);
        }
        let dim = 1u64 << z;
        if x >= dim || y >= dim {
            return Err(PmtError::InvalidHeader);
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self {
            z,
            x: x as u32,
            y: y as u32,
        })
    }

    /// Computes the tile coordinate that contains the given longitude/latitude
    /// (WGS84 degrees) at the given zoom level, using the standard slippy-map
    /// Web Mercator tiling scheme.
    ///
    /// # Errors
    /// Returns [`PmtError::InvalidHeader`] if `zoom` exceeds [`MAX_ZOOM`].
    pub fn from_lon_lat_zoom(lon: f64, lat: f64, zoom: u8) -> Result<Self, PmtError> {
        if zoom > MAX_ZOOM {
            return Err(PmtError::InvalidHeader);
        }
        let lat = lat.clamp(-85.051_128_78, 85.051_128_78);
        let lon = lon.clamp(-180.0, 180.0);
        let n = f64::from(1u32 << zoom);
        let x = ((lon + 180.0) / 360.0) * n;
        let lat_rad = lat.to_radians();
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0
            * n;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let x = (x.floor() as u64).min(n as u64 - 1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let y = (y.floor() as u64).min(n as u64 - 1);
        Self::new(zoom, x, y)
    }

    /// Longitude/latitude (WGS84 degrees) of this tile's center, inverting
    /// the projection used by [`Self::from_lon_lat_zoom`].
    #[must_use]
    pub fn center_lon_lat(&self) -> (f64, f64) {
        let n = f64::from(1u32 << self.z);
        let lon = (f64::from(self.x) + 0.5) / n * 360.0 - 180.0;
        let lat_rad = (std::f64::consts::PI * (1.0 - 2.0 * (f64::from(self.y) + 0.5) / n)).sinh().atan();
        (lon, lat_rad.to_degrees())
    }

    /// Zoom level.
    #[must_use]
    pub fn z(&self) -> u8 {
        self.z
    }

    /// Column.
    #[must_use]
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Row.
    #[must_use]
    pub fn y(&self) -> u32 {
        self.y
    }
}

impl TryFrom<TileId> for TileCoord {
    type Error = PmtError;

    fn try_from(id: TileId) -> Result<Self, Self::Error> {
        let (z, x, y) = id_to_zxy(id.value()).ok_or(PmtError::InvalidHeader)?;
        Ok(Self {
            z,
            #[allow(clippy::cast_possible_truncation)]
            x: x as u32,
            #[allow(clippy::cast_possible_truncation)]
            y: y as u32,
        })
    }
}

impl From<TileCoord> for TileId {
    fn from(coord: TileCoord) -> Self {
        #[allow(clippy::unwrap_used)]
        // TileCoord is always constructed with a valid z/x/y, so this cannot fail.
        TileId::new(calc_tile_id(coord.z, u64::from(coord.x), u64::from(coord.y)).unwrap())
            .unwrap()
    }
}

/// A validated Hilbert-curve tile id (`tile_id` field of a directory entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TileId(u64);

impl TileId {
    /// Wraps a raw tile id. Validates that it addresses a zoom `<= MAX_ZOOM`.
    ///
    /// # Errors
    /// Returns [`PmtError::InvalidHeader`] if the id is beyond [`MAX_TILE_ID`].
    pub fn new(id: u64) -> Result<Self, PmtError> {
        if id > MAX_TILE_ID {
            return Err(PmtError::InvalidHeader);
        }
        Ok(Self(id))
    }

    /// The raw `u64` value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Zoom level this id belongs to.
    #[must_use]
    pub fn zoom(&self) -> Option<u8> {
        id_to_zxy(self.0).map(|(z, _, _)| z)
    }

    /// The id of this tile's parent at `z - 1`.
    ///
    /// Returns `None` at zoom 0. Computed directly from the base-id arithmetic
    /// (`parent_base + (id - base) / 4`) without a full decode/re-encode round
    /// trip, since every group of 4 siblings on the Hilbert curve is contiguous.
    #[must_use]
    pub fn parent_id(&self) -> Option<TileId> {
        parent_id(self.0).map(TileId)
    }
}

impl From<TileId> for u64 {
    fn from(id: TileId) -> Self {
        id.0
    }
}

/// Computes the Hilbert tile id for a `(z, x, y)` coordinate.
///
/// Returns `None` if `z` is out of range or `x`/`y` are outside `[0, 2^z)`.
#[must_use]
pub fn calc_tile_id(z: u8, x: u64, y: u64) -> Option<u64> {
    if z == 0 {
        return Some(0);
    }
    if z > MAX_ZOOM {
        return None;
    }
    let dim = 1u64 << z;
    if x >= dim || y >= dim {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let hilbert_index = fast_hilbert::xy2h(x as u32, y as u32, u32::from(z));

    base_id_for_zoom(z).map(|base| base + hilbert_index)
}

/// Decodes a Hilbert tile id back into `(z, x, y)`.
///
/// Returns `None` if `id` exceeds [`MAX_TILE_ID`].
#[must_use]
pub fn id_to_zxy(tile_id: u64) -> Option<(u8, u64, u64)> {
    if tile_id == 0 {
        return Some((0, 0, 0));
    }
    if tile_id > MAX_TILE_ID {
        return None;
    }

    let z = PYRAMID_SIZE_BY_ZOOM
        .iter()
        .rposition(|&base| base <= tile_id)?;
    #[allow(clippy::cast_possible_truncation)]
    let z = z as u8;

    let base = base_id_for_zoom(z)?;
    let hilbert_index = tile_id - base;

    let (x, y) = fast_hilbert::h2xy(hilbert_index, u32::from(z));
    Some((z, u64::from(x), u64::from(y)))
}

/// Computes the id of the given tile's parent at `z - 1`.
///
/// `None` at zoom 0.
#[must_use]
pub(crate) fn parent_id(tile_id: u64) -> Option<u64> {
    if tile_id == 0 {
        return None;
    }
    let z = PYRAMID_SIZE_BY_ZOOM
        .iter()
        .rposition(|&base| base <= tile_id)?;
    if z == 0 {
        return None;
    }
    let base = PYRAMID_SIZE_BY_ZOOM[z];
    #[allow(clippy::cast_possible_truncation)]
    let parent_base = PYRAMID_SIZE_BY_ZOOM[z - 1];
    Some(parent_base + (tile_id - base) / 4)
}

#[cfg(test)]
mod test {
    use super::{calc_tile_id, id_to_zxy, parent_id};
    use crate::tile::{TileCoord, TileId};

    #[test]
    fn test_calc_tile_id() {
        assert_eq!(calc_tile_id(0, 0, 0), Some(0));
        assert_eq!(calc_tile_id(1, 1, 0), Some(4));
        assert_eq!(calc_tile_id(2, 1, 3), Some(11));
        assert_eq!(calc_tile_id(3, 3, 0), Some(26));
        assert_eq!(calc_tile_id(20, 0, 0), Some(366503875925));
        assert_eq!(calc_tile_id(21, 0, 0), Some(1466015503701));
    }

    #[test]
    fn test_roundtrip() {
        let cases: &[(u8, u64, u64)] = &[
            (0, 0, 0),
            (1, 1, 0),
            (2, 1, 3),
            (3, 3, 0),
            (3, 7, 7),
            (10, 500, 17),
            (20, 0, 0),
            (31, 0, 0),
            (31, (1 << 31) - 1, (1 << 31) - 1),
        ];
        for &(z, x, y) in cases {
            let id = calc_tile_id(z, x, y).expect("valid coord");
            let (z2, x2, y2) = id_to_zxy(id).expect("valid id");
            assert_eq!((z, x, y), (z2, x2, y2), "roundtrip failed for z={z}");
        }
    }

    #[test]
    fn test_zero_zoom_no_iteration() {
        assert_eq!(calc_tile_id(0, 0, 0), Some(0));
        assert_eq!(id_to_zxy(0), Some((0, 0, 0)));
    }

    #[test]
    fn test_parent_id() {
        for z in 1..=5u8 {
            for x in 0..(1u64 << z) {
                for y in 0..(1u64 << z) {
                    let id = calc_tile_id(z, x, y).unwrap();
                    let expected = calc_tile_id(z - 1, x >> 1, y >> 1).unwrap();
                    assert_eq!(parent_id(id), Some(expected), "z={z} x={x} y={y}");
                }
            }
        }
        assert_eq!(parent_id(0), None);
    }

    #[test]
    fn test_tile_id_parent_id_matches_free_fn() {
        let id = TileId::new(calc_tile_id(4, 3, 2).unwrap()).unwrap();
        let parent = id.parent_id().unwrap();
        let coord = TileCoord::try_from(parent).unwrap();
        assert_eq!((coord.z(), coord.x(), coord.y()), (3, 1, 1));
    }

    #[test]
    fn test_out_of_range_zoom_rejected() {
        assert!(TileCoord::new(32, 0, 0).is_err());
        assert!(TileCoord::new(5, 1 << 5, 0).is_err());
    }
}
