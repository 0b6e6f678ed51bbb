//! Terrain-RGB elevation tiles: web-Mercator (z,x,y) keys and their decoded grids.

/// Tile side length in pixels. Matches the terrain-RGB convention used by the upstream
/// tile source and by the terrain-tile output (`§6`).
pub const TILE_SIZE: usize = 256;

/// Sentinel written to a tile's grid where the upstream source had no data.
pub const NODATA_SENTINEL: f32 = -32768.0;

/// Default sampling zoom for point lookups.
pub const DEFAULT_ZOOM: u8 = 12;

/// Web-Mercator tile coordinate. Keys are unique within a `TileStore`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// The web-Mercator tile enclosing `(lat, lon)` at zoom `z`.
    pub fn enclosing(lat: f64, lon: f64, z: u8) -> Self {
        let n = 2f64.powi(z as i32);
        let lat_rad = lat.to_radians();
        let x = ((lon + 180.0) / 360.0 * n).floor().max(0.0) as u32;
        let y = ((1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * n)
            .floor()
            .max(0.0) as u32;
        Self { z, x: x.min(n as u32 - 1), y: y.min(n as u32 - 1) }
    }

    /// Geographic bounds of this tile (north, south, east, west).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let n = 2f64.powi(self.z as i32);
        let lon_west = self.x as f64 / n * 360.0 - 180.0;
        let lon_east = (self.x + 1) as f64 / n * 360.0 - 180.0;
        let lat_north = tile_y_to_lat(self.y as f64, n);
        let lat_south = tile_y_to_lat((self.y + 1) as f64, n);
        (lat_north, lat_south, lon_east, lon_west)
    }
}

fn tile_y_to_lat(y: f64, n: f64) -> f64 {
    let sigma = std::f64::consts::PI * (1.0 - 2.0 * y / n);
    sigma.sinh().atan().to_degrees()
}

/// An immutable, square-ish rectangular grid of float32 meters-above-ellipsoid.
///
/// Nodata pixels are decoded as `0.0`, never as [`NODATA_SENTINEL`] — callers never see
/// the sentinel, it only documents the wire convention.
#[derive(Clone, Debug)]
pub struct ElevationTile {
    pub key: TileKey,
    pub width: usize,
    pub height: usize,
    heights: Vec<f32>,
}

impl ElevationTile {
    pub fn new(key: TileKey, width: usize, height: usize, heights: Vec<f32>) -> Self {
        debug_assert_eq!(heights.len(), width * height);
        Self { key, width, height, heights }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.heights[row * self.width + col]
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }
}

/// Decodes a terrain-RGB pixel into meters: `-10000 + ((R*65536 + G*256 + B) * 0.1)`.
/// Pixels equal to the encoded nodata sentinel decode to `0.0`.
pub fn decode_terrain_rgb_pixel(r: u8, g: u8, b: u8) -> f32 {
    let raw = (r as u32) * 65536 + (g as u32) * 256 + (b as u32);
    let meters = -10000.0 + (raw as f64) * 0.1;
    if meters as f32 == NODATA_SENTINEL {
        0.0
    } else {
        meters as f32
    }
}

/// Encodes a height in meters into the terrain-RGB 24-bit representation used both by
/// the upstream tile source and by this crate's own terrain-tile output (`§6`).
/// `h_scaled = clip((h_m + 10000) * 10, 0, 2^24 - 1)`.
pub fn encode_terrain_rgb_pixel(height_m: f32) -> (u8, u8, u8) {
    let scaled = ((height_m as f64 + 10000.0) * 10.0).clamp(0.0, (1u32 << 24) as f64 - 1.0) as u32;
    let r = ((scaled >> 16) & 0xFF) as u8;
    let g = ((scaled >> 8) & 0xFF) as u8;
    let b = (scaled & 0xFF) as u8;
    (r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_encoding_preserves_tenth_meter_precision() {
        for h in [-9999.3_f32, 0.0, 1234.5, 8848.9, -500.0] {
            let (r, g, b) = encode_terrain_rgb_pixel(h);
            let decoded = decode_terrain_rgb_pixel(r, g, b);
            assert!((decoded - h).abs() < 0.11, "h={h} decoded={decoded}");
        }
    }

    #[test]
    fn tile_key_enclosing_is_within_bounds() {
        let key = TileKey::enclosing(51.5, -0.12, 12);
        let (north, south, east, west) = key.bounds();
        assert!(south <= 51.5 && 51.5 <= north);
        assert!(west <= -0.12 && -0.12 <= east);
    }
}
