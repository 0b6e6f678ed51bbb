//! Per-site viewshed: a radial R2 sweep with a Fresnel-adjusted horizon, grounded on
//! the meshcore line-of-sight sweep (`terrain.rs` in the reference pack) generalized
//! from a two-point LOS check into a full 360-degree raster.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::elevation_sampler::ElevationSampler;
use crate::rf_physics::{earth_curvature_drop_m, fresnel_radius_m};

/// Options controlling one viewshed computation.
#[derive(Copy, Clone, Debug)]
pub struct ViewshedOptions {
    pub radius_m: f64,
    pub resolution_m: f64,
    pub tx_height_m: f64,
    pub rx_height_m: f64,
    pub frequency_mhz: f64,
    pub k_factor: f64,
}

impl Default for ViewshedOptions {
    fn default() -> Self {
        Self {
            radius_m: 5000.0,
            resolution_m: 100.0,
            tx_height_m: 10.0,
            rx_height_m: 2.0,
            frequency_mhz: 915.0,
            k_factor: 1.333,
        }
    }
}

/// A boolean raster of receivable pixels around one transmitter, with the geographic
/// coordinates of each row/column center.
#[derive(Clone, Debug)]
pub struct ViewshedRaster {
    pub tx_lat: f64,
    pub tx_lon: f64,
    pub side: usize,
    pub resolution_m: f64,
    pub visible: Vec<bool>,
    pub row_lats: Vec<f64>,
    pub col_lons: Vec<f64>,
}

impl ViewshedRaster {
    #[inline]
    pub fn is_visible(&self, row: usize, col: usize) -> bool {
        self.visible[row * self.side + col]
    }

    /// Iterates the (row, col, lat, lon) of every visible cell.
    pub fn visible_cells(&self) -> impl Iterator<Item = (usize, usize, f64, f64)> + '_ {
        (0..self.side).flat_map(move |row| {
            (0..self.side).filter_map(move |col| {
                if self.is_visible(row, col) {
                    Some((row, col, self.row_lats[row], self.col_lons[col]))
                } else {
                    None
                }
            })
        })
    }

    pub fn visible_count(&self) -> usize {
        self.visible.iter().filter(|&&v| v).count()
    }
}

/// Computes the viewshed for a transmitter at `(tx_lat, tx_lon)`.
pub fn compute_viewshed(
    sampler: &ElevationSampler<'_>,
    tx_lat: f64,
    tx_lon: f64,
    options: ViewshedOptions,
) -> ViewshedRaster {
    let half = (options.radius_m / options.resolution_m).ceil() as i64;
    let side = (2 * half + 1) as usize;

    let lat_deg_per_m = 1.0 / crate::geo_coord::METERS_PER_DEGREE_LAT;
    let lon_deg_per_m =
        1.0 / (crate::geo_coord::METERS_PER_DEGREE_LAT * tx_lat.to_radians().cos().abs().max(1e-6));

    // Row 0 is the north edge (north-up), matching the master-grid convention.
    let row_lats: Vec<f64> =
        (0..side).map(|r| tx_lat + (half - r as i64) as f64 * options.resolution_m * lat_deg_per_m).collect();
    let col_lons: Vec<f64> =
        (0..side).map(|c| tx_lon + (c as i64 - half) as f64 * options.resolution_m * lon_deg_per_m).collect();

    let visible: Vec<AtomicBool> = (0..side * side).map(|_| AtomicBool::new(false)).collect();

    // The transmitter's own cell is always visible (§4.4, §8 property 4).
    visible[(half as usize) * side + half as usize].store(true, Ordering::Relaxed);

    let (tx_z, _) = sampler.elevation_with_coverage(tx_lat, tx_lon);
    let tx_alt0 = tx_z as f64 + options.tx_height_m;

    let step_m = options.resolution_m / 2.0;
    let num_azimuths = ((2.0 * std::f64::consts::PI * options.radius_m) / options.resolution_m).ceil() as u64;
    let num_azimuths = num_azimuths.max(1);
    let num_steps = (options.radius_m / step_m).ceil() as u64;

    (0..num_azimuths).into_par_iter().for_each(|az_idx| {
        let theta = 2.0 * std::f64::consts::PI * az_idx as f64 / num_azimuths as f64;
        let sin_t = theta.sin();
        let cos_t = theta.cos();

        // alpha_max starts pointing straight down: no obstruction constrains the
        // first ring, matching the flat-terrain invariant (§8 property 5).
        let mut alpha_max = -std::f64::consts::FRAC_PI_2;

        for step_idx in 1..=num_steps {
            let r = (step_idx as f64 * step_m).min(options.radius_m);

            let dy = r * cos_t;
            let dx = r * sin_t;
            let lat = tx_lat + dy * lat_deg_per_m;
            let lon = tx_lon + dx * lon_deg_per_m;

            let (z_r, covered) = sampler.elevation_with_coverage(lat, lon);
            let z_r = z_r as f64;

            let curvature_drop = earth_curvature_drop_m(r, r, options.k_factor);
            let ground_alt = z_r - curvature_drop;
            let rx_alt = z_r + options.rx_height_m - curvature_drop;

            let alpha_rx = (rx_alt - tx_alt0).atan2(r);
            let alpha_ground = (ground_alt - tx_alt0).atan2(r);

            // Fresnel clearance against the best unobstructed line seen so far,
            // treating the ray as a link of total length `radius_m` (t = r/radius_m).
            let los_alt_at_r = tx_alt0 + alpha_max.tan() * r;
            let f1 = fresnel_radius_m(options.radius_m, r / options.radius_m, options.frequency_mhz);
            let fresnel_clear = ground_alt <= los_alt_at_r - 0.6 * f1;

            let geometrically_clear = alpha_rx >= alpha_max;
            let cell_visible = covered && geometrically_clear && fresnel_clear;

            if cell_visible {
                if let Some((row, col)) = nearest_cell(r, theta, half, options.resolution_m) {
                    visible[row * side + col].store(true, Ordering::Relaxed);
                }
            }

            if alpha_ground > alpha_max {
                alpha_max = alpha_ground;
            }
        }
    });

    ViewshedRaster {
        tx_lat,
        tx_lon,
        side,
        resolution_m: options.resolution_m,
        visible: visible.into_iter().map(|b| b.into_inner()).collect(),
        row_lats,
        col_lons,
    }
}

/// Maps a polar offset `(r, theta)` from the grid center to a `(row, col)` index.
/// `half` is the number of cells on either side of the center, matching
/// `compute_viewshed`'s grid construction.
fn nearest_cell(r: f64, theta: f64, half: i64, resolution_m: f64) -> Option<(usize, usize)> {
    let dy = r * theta.cos();
    let dx = r * theta.sin();
    let row = half - (dy / resolution_m).round() as i64;
    let col = half + (dx / resolution_m).round() as i64;
    if row < 0 || col < 0 || row > 2 * half || col > 2 * half {
        return None;
    }
    Some((row as usize, col as usize))
}
