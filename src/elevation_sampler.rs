//! Point, path-profile, batch, and sub-grid elevation sampling on top of a [`TileStore`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::MeshRfError;
use crate::rf_physics::ProfileSample;
use crate::tile::{ElevationTile, TileKey, DEFAULT_ZOOM, TILE_SIZE};
use crate::tile_store::TileStore;

/// An ordered sequence of elevations sampled at equal arc-length along a great-circle
/// path between two points.
#[derive(Clone, Debug)]
pub struct PathProfile {
    pub samples: Vec<ProfileSample>,
}

/// Samples terrain elevation on top of a `TileStore`, at a fixed zoom level.
pub struct ElevationSampler<'a> {
    store: &'a TileStore,
    zoom: u8,
}

impl<'a> ElevationSampler<'a> {
    pub fn new(store: &'a TileStore) -> Self {
        Self { store, zoom: DEFAULT_ZOOM }
    }

    pub fn with_zoom(store: &'a TileStore, zoom: u8) -> Self {
        Self { store, zoom }
    }

    /// Bilinearly interpolated elevation at `(lat, lon)`. Samples that fall outside
    /// the tile grid in which the enclosing pixel sits are clamped to the grid edge,
    /// per §4.2's tile-boundary behavior.
    pub fn elevation(&self, lat: f64, lon: f64) -> f32 {
        self.elevation_with_coverage(lat, lon).0
    }

    /// Like [`Self::elevation`] but also reports whether the sample fell inside tile
    /// coverage. Used by the viewshed, where samples outside coverage must be treated
    /// as elevation 0 for the ray walk but never marked visible (§4.4 edge cases).
    pub fn elevation_with_coverage(&self, lat: f64, lon: f64) -> (f32, bool) {
        let key = TileKey::enclosing(lat, lon, self.zoom);
        match self.store.get_tile(key) {
            Ok(tile) => (sample_bilinear(&tile, key, lat, lon), true),
            Err(_) => (0.0, false),
        }
    }

    /// Samples `n` equally spaced points along the great-circle from `(lat1, lon1)`
    /// to `(lat2, lon2)`; `n` must be >= 2.
    pub fn profile(
        &self,
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
        n: usize,
    ) -> Result<PathProfile, MeshRfError> {
        if n < 2 {
            return Err(MeshRfError::InvalidInput(format!(
                "profile sample count must be >= 2, got {n}"
            )));
        }
        let total_m = crate::rf_physics::haversine_distance_m(lat1, lon1, lat2, lon2);
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                let (lat, lon) = great_circle_intermediate(lat1, lon1, lat2, lon2, t);
                ProfileSample { distance_m: total_m * t, elevation_m: self.elevation(lat, lon) as f64 }
            })
            .collect();
        Ok(PathProfile { samples })
    }

    /// Elevation at every point, batched by enclosing tile so each unique tile is
    /// fetched at most once.
    pub fn batch(&self, points: &[(f64, f64)]) -> Vec<f32> {
        let keys: Vec<TileKey> =
            points.iter().map(|&(lat, lon)| TileKey::enclosing(lat, lon, self.zoom)).collect();
        let tiles: HashMap<TileKey, Result<Arc<ElevationTile>, MeshRfError>> =
            self.store.get_tiles_batch(&keys);

        points
            .iter()
            .zip(keys.iter())
            .map(|(&(lat, lon), key)| match tiles.get(key) {
                Some(Ok(tile)) => sample_bilinear(tile, *key, lat, lon),
                _ => 0.0,
            })
            .collect()
    }

    /// An interpolated `size x size` sub-grid covering tile `(tile_x, tile_y)` at zoom
    /// `z`, used to render terrain-RGB output (the out-of-scope tile-serving endpoint
    /// of §6, exercised here so the encode/decode round trip has a concrete producer).
    pub fn grid(&self, tile_x: u32, tile_y: u32, z: u8, size: usize) -> Vec<f32> {
        let key = TileKey::new(z, tile_x, tile_y);
        let (north, south, east, west) = key.bounds();
        let mut out = Vec::with_capacity(size * size);
        for row in 0..size {
            let lat = north - (row as f64 + 0.5) / size as f64 * (north - south);
            for col in 0..size {
                let lon = west + (col as f64 + 0.5) / size as f64 * (east - west);
                out.push(self.elevation(lat, lon));
            }
        }
        out
    }
}

fn sample_bilinear(tile: &ElevationTile, key: TileKey, lat: f64, lon: f64) -> f32 {
    let (north, south, east, west) = key.bounds();
    let rel_y = ((north - lat) / (north - south)).clamp(0.0, 1.0);
    let rel_x = ((lon - west) / (east - west)).clamp(0.0, 1.0);

    let fy = rel_y * (tile.height - 1) as f64;
    let fx = rel_x * (tile.width - 1) as f64;

    let r0 = fy.floor() as usize;
    let c0 = fx.floor() as usize;
    let r1 = (r0 + 1).min(tile.height - 1);
    let c1 = (c0 + 1).min(tile.width - 1);

    let dr = fy - r0 as f64;
    let dc = fx - c0 as f64;

    let h00 = tile.get(r0, c0) as f64;
    let h01 = tile.get(r0, c1) as f64;
    let h10 = tile.get(r1, c0) as f64;
    let h11 = tile.get(r1, c1) as f64;

    let h0 = h00 * (1.0 - dc) + h01 * dc;
    let h1 = h10 * (1.0 - dc) + h11 * dc;

    (h0 * (1.0 - dr) + h1 * dr) as f32
}

/// Point at fractional position `t` along the great-circle from `(lat1, lon1)` to
/// `(lat2, lon2)`. Uses a spherical (slerp-style) interpolation rather than linear
/// lat/lon interpolation so long paths stay on the great circle.
fn great_circle_intermediate(lat1: f64, lon1: f64, lat2: f64, lon2: f64, t: f64) -> (f64, f64) {
    let phi1 = lat1.to_radians();
    let lam1 = lon1.to_radians();
    let phi2 = lat2.to_radians();
    let lam2 = lon2.to_radians();

    let d = 2.0
        * ((phi2 - phi1) / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * ((lam2 - lam1) / 2.0).sin().powi(2);
    let delta = 2.0 * d.sqrt().asin();

    if delta.abs() < 1e-12 {
        return (lat1, lon1);
    }

    let a = ((1.0 - t) * delta).sin() / delta.sin();
    let b = (t * delta).sin() / delta.sin();

    let x = a * phi1.cos() * lam1.cos() + b * phi2.cos() * lam2.cos();
    let y = a * phi1.cos() * lam1.sin() + b * phi2.cos() * lam2.sin();
    let z = a * phi1.sin() + b * phi2.sin();

    let phi = z.atan2((x * x + y * y).sqrt());
    let lam = y.atan2(x);

    (phi.to_degrees(), lam.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_store::{FnTileSource, TileCacheConfig};

    #[test]
    fn flat_terrain_elevation_is_constant() {
        let store = TileStore::new(Box::new(FnTileSource::new(|_, _| 7.5)), TileCacheConfig::default());
        let sampler = ElevationSampler::new(&store);
        assert_eq!(sampler.elevation(10.0, 10.0), 7.5);
        assert_eq!(sampler.elevation(10.01, 10.02), 7.5);
    }

    #[test]
    fn profile_is_monotone_in_distance() {
        let store = TileStore::new(Box::new(FnTileSource::new(|_, _| 0.0)), TileCacheConfig::default());
        let sampler = ElevationSampler::new(&store);
        let profile = sampler.profile(10.0, 10.0, 10.1, 10.1, 10).unwrap();
        for w in profile.samples.windows(2) {
            assert!(w[1].distance_m >= w[0].distance_m);
        }
    }

    #[test]
    fn profile_endpoints_match_requested_points() {
        let store = TileStore::new(Box::new(FnTileSource::new(|_, _| 0.0)), TileCacheConfig::default());
        let sampler = ElevationSampler::new(&store);
        let profile = sampler.profile(0.0, 0.0, 0.0, 1.0, 5).unwrap();
        assert!((profile.samples[0].distance_m).abs() < 1e-6);
    }

    #[test]
    fn batch_matches_individual_lookups() {
        let store = TileStore::new(Box::new(FnTileSource::new(|lat, lon| (lat + lon) as f32)), TileCacheConfig::default());
        let sampler = ElevationSampler::new(&store);
        let pts = vec![(10.0, 10.0), (10.001, 10.002), (-5.0, 20.0)];
        let batched = sampler.batch(&pts);
        for (i, &(lat, lon)) in pts.iter().enumerate() {
            assert!((batched[i] - sampler.elevation(lat, lon)).abs() < 1e-3);
        }
    }
}
