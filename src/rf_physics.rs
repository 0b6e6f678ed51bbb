//! RF link physics: distance, free-space loss, Fresnel clearance, earth curvature,
//! and Bullington-style knife-edge diffraction.

/// WGS-84 mean earth radius in meters, used throughout this module for both Haversine
/// distance and earth-curvature correction (no separate ellipsoid model).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Speed of light used to derive wavelength from frequency, in m*MHz.
const SPEED_OF_LIGHT_M_MHZ: f64 = 299.792458;

/// Great-circle distance between two points in meters.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Wavelength in meters for a frequency given in MHz.
pub fn wavelength_m(frequency_mhz: f64) -> f64 {
    SPEED_OF_LIGHT_M_MHZ / frequency_mhz
}

/// Free-space path loss in dB: `20*log10(d_m) + 20*log10(f_MHz) - 27.55`.
pub fn free_space_loss_db(distance_m: f64, frequency_mhz: f64) -> f64 {
    20.0 * distance_m.log10() + 20.0 * frequency_mhz.log10() - 27.55
}

/// First-Fresnel-zone radius at fractional position `t` in `[0, 1]` over a path of
/// total length `distance_m`: `sqrt(lambda * d * t * (1 - t))`.
pub fn fresnel_radius_m(distance_m: f64, t: f64, frequency_mhz: f64) -> f64 {
    let lambda = wavelength_m(frequency_mhz);
    (lambda * distance_m * t * (1.0 - t)).max(0.0).sqrt()
}

/// Earth-curvature sag of the line of sight at a point splitting the path into
/// segments `d1` and `d2` (meters), under k-factor `k` (typically 4/3).
pub fn earth_curvature_drop_m(d1_m: f64, d2_m: f64, k_factor: f64) -> f64 {
    d1_m * d2_m / (2.0 * k_factor * EARTH_RADIUS_M)
}

/// Diffraction parameter `v` for an obstacle of height `h` above the line of sight,
/// at distances `d1`, `d2` from each end of a path with wavelength `lambda`.
pub fn diffraction_v(h_m: f64, d1_m: f64, d2_m: f64, frequency_mhz: f64) -> f64 {
    let lambda = wavelength_m(frequency_mhz);
    if d1_m <= 0.0 || d2_m <= 0.0 {
        return f64::NEG_INFINITY;
    }
    h_m * (2.0 * (d1_m + d2_m) / (lambda * d1_m * d2_m)).sqrt()
}

/// Knife-edge diffraction loss in dB from the standard approximation to the Fresnel
/// integral: `0` below `v = -0.78`, otherwise `6.9 + 20*log10(sqrt((v-0.1)^2+1) + v - 0.1)`.
pub fn knife_edge_loss_db(v: f64) -> f64 {
    if v <= -0.78 {
        0.0
    } else {
        6.9 + 20.0 * (((v - 0.1).powi(2) + 1.0).sqrt() + v - 0.1).log10()
    }
}

/// One sample along a path profile: distance from the transmitter and ground
/// elevation there.
#[derive(Copy, Clone, Debug)]
pub struct ProfileSample {
    pub distance_m: f64,
    pub elevation_m: f64,
}

/// Verdict for a single link, derived from its worst-case Fresnel clearance ratio.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Viable,
    Degraded,
    Blocked,
    Unknown,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkStatus::Viable => "viable",
            LinkStatus::Degraded => "degraded",
            LinkStatus::Blocked => "blocked",
            LinkStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of analyzing one link end to end.
#[derive(Copy, Clone, Debug)]
pub struct LinkAnalysis {
    pub distance_m: f64,
    pub path_loss_db: f64,
    pub min_clearance_ratio: f64,
    pub status: LinkStatus,
}

/// Options affecting link analysis, carried through from the batch job (`§6`).
#[derive(Copy, Clone, Debug)]
pub struct LinkOptions {
    pub frequency_mhz: f64,
    pub k_factor: f64,
    pub clutter_height_m: f64,
    /// Path loss budget in dB; exceeding it forces `status = blocked` even when
    /// clearance alone would be viable or degraded.
    pub path_loss_budget_db: f64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self { frequency_mhz: 915.0, k_factor: 1.333, clutter_height_m: 0.0, path_loss_budget_db: 200.0 }
    }
}

/// Analyzes one link from a terrain profile between two antenna sites.
///
/// `profile` holds ground elevations sampled at equal arc-length between the sites
/// (distance 0 at the transmitter, `distance_m` at the receiver); `tx_height_m` /
/// `rx_height_m` are antenna heights above ground at each end. The Bullington
/// construction reduces the profile to the single most-obstructing edge, per §4.3;
/// `clutter_height_m` is added to every terrain sample used for that diffraction
/// search but, per the open question in §9, is NOT added when computing Fresnel
/// radii — only real terrain/clutter obstructs the line of sight, the Fresnel zone
/// itself is a geometric property of the link.
pub fn analyze_link(
    profile: &[ProfileSample],
    distance_m: f64,
    tx_height_m: f64,
    rx_height_m: f64,
    options: LinkOptions,
) -> LinkAnalysis {
    if distance_m <= 0.0 || profile.len() < 2 {
        return LinkAnalysis {
            distance_m,
            path_loss_db: free_space_loss_db(distance_m.max(1.0), options.frequency_mhz),
            min_clearance_ratio: 0.0,
            status: LinkStatus::Viable,
        };
    }

    let tx_alt = profile[0].elevation_m + tx_height_m;
    let rx_alt = profile[profile.len() - 1].elevation_m + rx_height_m;

    // Bullington: find the single sample whose height above the straight tx-rx line
    // (after earth-curvature and clutter correction) is largest. That sample is the
    // equivalent knife edge.
    let mut worst_h_m = f64::NEG_INFINITY;
    let mut worst_d1_m = 0.0;
    let mut worst_d2_m = 0.0;
    let mut worst_clearance_ratio = 0.0_f64;

    for sample in profile {
        let d1 = sample.distance_m;
        let d2 = distance_m - d1;
        if d1 <= 0.0 || d2 <= 0.0 {
            continue;
        }
        let t = d1 / distance_m;
        let los_alt = tx_alt + (rx_alt - tx_alt) * t;
        let curvature_drop = earth_curvature_drop_m(d1, d2, options.k_factor);
        let obstacle_alt = sample.elevation_m + options.clutter_height_m - curvature_drop;
        let h_above_los = obstacle_alt - los_alt;

        let f1 = fresnel_radius_m(distance_m, t, options.frequency_mhz);
        let clearance_ratio = if f1 > 0.0 { h_above_los / f1 } else { 0.0 };
        if clearance_ratio > worst_clearance_ratio {
            worst_clearance_ratio = clearance_ratio;
        }

        if h_above_los > worst_h_m {
            worst_h_m = h_above_los;
            worst_d1_m = d1;
            worst_d2_m = d2;
        }
    }

    let v = if worst_h_m.is_finite() {
        diffraction_v(worst_h_m, worst_d1_m, worst_d2_m, options.frequency_mhz)
    } else {
        f64::NEG_INFINITY
    };
    let diffraction_loss_db = knife_edge_loss_db(v).max(0.0);

    let path_loss_db =
        free_space_loss_db(distance_m, options.frequency_mhz) + diffraction_loss_db;

    let status = if worst_clearance_ratio <= 0.4 && path_loss_db <= options.path_loss_budget_db {
        LinkStatus::Viable
    } else if worst_clearance_ratio <= 1.0 && path_loss_db <= options.path_loss_budget_db {
        LinkStatus::Degraded
    } else {
        LinkStatus::Blocked
    };

    LinkAnalysis { distance_m, path_loss_db, min_clearance_ratio: worst_clearance_ratio, status }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_symmetry_and_self_distance() {
        let (lat_a, lon_a) = (51.5, -0.1);
        let (lat_b, lon_b) = (48.85, 2.35);
        let d_ab = haversine_distance_m(lat_a, lon_a, lat_b, lon_b);
        let d_ba = haversine_distance_m(lat_b, lon_b, lat_a, lon_a);
        assert!((d_ab - d_ba).abs() < 1e-6);
        assert!(haversine_distance_m(lat_a, lon_a, lat_a, lon_a).abs() < 1e-9);
    }

    #[test]
    fn free_space_loss_matches_worked_example() {
        // E4: 5 km at 915 MHz ~= 105.6 dB +/- 0.5
        let loss = free_space_loss_db(5000.0, 915.0);
        assert!((loss - 105.6).abs() < 0.5, "loss={loss}");
    }

    #[test]
    fn knife_edge_loss_is_zero_below_threshold() {
        assert_eq!(knife_edge_loss_db(-1.0), 0.0);
        assert_eq!(knife_edge_loss_db(-0.78), 0.0);
        assert!(knife_edge_loss_db(0.0) > 0.0);
    }

    #[test]
    fn clear_flat_link_is_viable() {
        let dist = 5000.0;
        let n = 50;
        let profile: Vec<ProfileSample> = (0..n)
            .map(|i| ProfileSample { distance_m: dist * i as f64 / (n - 1) as f64, elevation_m: 0.0 })
            .collect();
        let analysis = analyze_link(&profile, dist, 10.0, 10.0, LinkOptions::default());
        assert_eq!(analysis.status, LinkStatus::Viable);
        assert!((analysis.path_loss_db - 105.6).abs() < 1.0);
    }

    #[test]
    fn ridge_blocks_link() {
        let dist = 5000.0;
        let n = 50;
        let profile: Vec<ProfileSample> = (0..n)
            .map(|i| {
                let d = dist * i as f64 / (n - 1) as f64;
                // 50m ridge centered at the midpoint
                let elevation_m = if (d - dist / 2.0).abs() < (dist / (n as f64)) * 2.0 { 50.0 } else { 0.0 };
                ProfileSample { distance_m: d, elevation_m }
            })
            .collect();
        let analysis = analyze_link(&profile, dist, 10.0, 10.0, LinkOptions::default());
        assert_eq!(analysis.status, LinkStatus::Blocked);
        assert!(analysis.min_clearance_ratio > 1.0);
    }
}
