//! Master-grid compositing: blits selected viewsheds onto one raster, renders the
//! RGBA preview PNG, and builds the inter-site link matrix.

use base64::Engine;
use image::{Rgba, RgbaImage};
use itertools::Itertools;

use crate::elevation_sampler::ElevationSampler;
use crate::geo_coord::GridAffine;
use crate::rf_physics::{analyze_link, LinkAnalysis, LinkOptions, LinkStatus};
use crate::site_selector::CandidateCoverage;
use crate::viewshed::ViewshedRaster;

/// Visible-pixel color of the composite preview: neon cyan at partial opacity over a
/// fully transparent background (§4.6).
const VISIBLE_RGBA: Rgba<u8> = Rgba([0, 242, 255, 150]);

/// One site's outcome after selection: its marginal coverage and connectivity.
#[derive(Clone, Debug)]
pub struct SiteResult {
    pub candidate_index: usize,
    pub marginal_coverage_km2: f64,
    pub unique_coverage_pct: f64,
    pub connectivity_score: usize,
}

/// One entry of the inter-site link matrix.
#[derive(Clone, Debug)]
pub struct LinkResult {
    pub node_a_idx: usize,
    pub node_b_idx: usize,
    pub dist_km: f64,
    pub status: LinkStatus,
    pub path_loss_db: f64,
    pub min_clearance_ratio: f64,
}

/// Final composite: master grid render plus per-site and per-link results.
pub struct CompositeResult {
    pub sites: Vec<SiteResult>,
    pub links: Vec<LinkResult>,
    pub total_unique_coverage_km2: f64,
    pub image_base64: String,
    pub bounds: (f64, f64, f64, f64), // north, south, east, west
}

/// Projects a viewshed raster's visible cells into sorted packed master-grid pixel
/// indices (`row * cols + col`), per §9's packed-array representation.
pub fn project_to_master_grid(raster: &ViewshedRaster, affine: &GridAffine) -> CandidateCoverage {
    let mut pixels = Vec::with_capacity(raster.visible_count());
    for (_, _, lat, lon) in raster.visible_cells() {
        if let Some((row, col)) = affine.project(lat, lon) {
            pixels.push((row * affine.cols() + col) as u64);
        }
    }
    CandidateCoverage::from_indices(pixels)
}

/// Composites the selected candidates' coverage into the final payload.
///
/// `selected` holds the chosen candidate indices in selection order (as returned by
/// [`crate::site_selector::select_sites`]); `coverages` and `node_coords` are indexed
/// by the original (pre-selection) candidate index. `node_coords` entries are
/// `(lat, lon, antenna_height_m)` — each site's own configured height, not a shared
/// default, since link analysis must use the actual antenna height at each end.
#[allow(clippy::too_many_arguments)]
pub fn composite(
    affine: &GridAffine,
    selected: &[usize],
    coverages: &[CandidateCoverage],
    node_coords: &[(f64, f64, f64)],
    sampler: &ElevationSampler<'_>,
    res_m: f64,
    link_options: LinkOptions,
) -> CompositeResult {
    let rows = affine.rows();
    let cols = affine.cols();
    let mut master = vec![false; rows * cols];

    let mut covered: Vec<u64> = Vec::new();
    let mut sites = Vec::with_capacity(selected.len());

    for &idx in selected {
        let pixels = &coverages[idx].pixels;
        for &p in pixels {
            master[p as usize] = true;
        }

        let new_count = count_new(pixels, &covered);
        let marginal_km2 = new_count as f64 * res_m * res_m / 1_000_000.0;

        merge_sorted(&mut covered, pixels);

        sites.push(SiteResult {
            candidate_index: idx,
            marginal_coverage_km2: marginal_km2,
            unique_coverage_pct: 0.0, // filled in once total is known, below
            connectivity_score: 0,    // filled in once links are built, below
        });
    }

    let total_unique_coverage_km2: f64 = sites.iter().map(|s| s.marginal_coverage_km2).sum();
    for site in &mut sites {
        site.unique_coverage_pct = if total_unique_coverage_km2 > 0.0 {
            site.marginal_coverage_km2 / total_unique_coverage_km2 * 100.0
        } else {
            0.0
        };
    }

    let links = build_link_matrix(selected, node_coords, sampler, link_options);
    for (site_pos, site) in sites.iter_mut().enumerate() {
        site.connectivity_score = links
            .iter()
            .filter(|l| {
                (l.node_a_idx == site_pos || l.node_b_idx == site_pos)
                    && matches!(l.status, LinkStatus::Viable | LinkStatus::Degraded)
            })
            .count();
    }

    let image_base64 = render_png(&master, rows, cols);
    let bbox = affine.bbox();

    CompositeResult {
        sites,
        links,
        total_unique_coverage_km2,
        image_base64,
        bounds: (bbox.max_lat(), bbox.min_lat(), bbox.max_lon(), bbox.min_lon()),
    }
}

fn count_new(pixels: &[u64], covered: &[u64]) -> usize {
    let mut i = 0;
    let mut j = 0;
    let mut count = 0;
    while i < pixels.len() && j < covered.len() {
        match pixels[i].cmp(&covered[j]) {
            std::cmp::Ordering::Less => {
                count += 1;
                i += 1;
            }
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    count + (pixels.len() - i)
}

fn merge_sorted(covered: &mut Vec<u64>, addition: &[u64]) {
    let mut merged = Vec::with_capacity(covered.len() + addition.len());
    let (mut i, mut j) = (0, 0);
    while i < covered.len() && j < addition.len() {
        match covered[i].cmp(&addition[j]) {
            std::cmp::Ordering::Less => {
                merged.push(covered[i]);
                i += 1;
            }
            std::cmp::Ordering::Equal => {
                merged.push(covered[i]);
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Greater => {
                merged.push(addition[j]);
                j += 1;
            }
        }
    }
    merged.extend_from_slice(&covered[i..]);
    merged.extend_from_slice(&addition[j..]);
    *covered = merged;
}

/// Builds the pairwise link matrix over selected sites, via a 50-sample elevation
/// profile per pair (§4.6), using each site's own configured antenna height. A single
/// link's analysis never aborts the batch: on failure it is logged and recorded with
/// `status = unknown`. `node_a_idx`/`node_b_idx` are positions within the selection
/// order (matching the final `results` array), not original candidate indices.
fn build_link_matrix(
    selected: &[usize],
    node_coords: &[(f64, f64, f64)],
    sampler: &ElevationSampler<'_>,
    options: LinkOptions,
) -> Vec<LinkResult> {
    const PROFILE_SAMPLES: usize = 50;

    (0..selected.len())
        .tuple_combinations()
        .map(|(i, j)| {
            let (lat_a, lon_a, height_a) = node_coords[selected[i]];
            let (lat_b, lon_b, height_b) = node_coords[selected[j]];

            let analysis = analyze_one_link(
                sampler, i, j, lat_a, lon_a, height_a, lat_b, lon_b, height_b, PROFILE_SAMPLES,
                options,
            )
            .unwrap_or_else(|e| {
                log::warn!("{e}");
                LinkAnalysis {
                    distance_m: crate::rf_physics::haversine_distance_m(lat_a, lon_a, lat_b, lon_b),
                    path_loss_db: 0.0,
                    min_clearance_ratio: 0.0,
                    status: LinkStatus::Unknown,
                }
            });

            LinkResult {
                node_a_idx: i,
                node_b_idx: j,
                dist_km: analysis.distance_m / 1000.0,
                status: analysis.status,
                path_loss_db: analysis.path_loss_db,
                min_clearance_ratio: analysis.min_clearance_ratio,
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn analyze_one_link(
    sampler: &ElevationSampler<'_>,
    a_idx: usize,
    b_idx: usize,
    lat_a: f64,
    lon_a: f64,
    height_a: f64,
    lat_b: f64,
    lon_b: f64,
    height_b: f64,
    n: usize,
    options: LinkOptions,
) -> Result<LinkAnalysis, crate::error::MeshRfError> {
    let distance_m = crate::rf_physics::haversine_distance_m(lat_a, lon_a, lat_b, lon_b);
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return Err(crate::error::MeshRfError::LinkAnalysis {
            a_idx,
            b_idx,
            cause: "sites are coincident; no meaningful link distance".to_string(),
        });
    }
    let profile = sampler.profile(lat_a, lon_a, lat_b, lon_b, n).map_err(|e| {
        crate::error::MeshRfError::LinkAnalysis { a_idx, b_idx, cause: e.to_string() }
    })?;
    Ok(analyze_link(&profile.samples, distance_m, height_a, height_b, options))
}

fn render_png(master: &[bool], rows: usize, cols: usize) -> String {
    let mut img = RgbaImage::from_pixel(cols as u32, rows as u32, Rgba([0, 0, 0, 0]));
    for row in 0..rows {
        for col in 0..cols {
            if master[row * cols + col] {
                img.put_pixel(col as u32, row as u32, VISIBLE_RGBA);
            }
        }
    }

    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    img.write_to(&mut cursor, image::ImageFormat::Png).expect("in-memory PNG encode cannot fail");
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_coord::GeoBBox;
    use crate::tile_store::{FnTileSource, TileCacheConfig, TileStore};
    use crate::viewshed::{compute_viewshed, ViewshedOptions};

    fn flat_sampler(store: &TileStore) -> ElevationSampler<'_> {
        ElevationSampler::new(store)
    }

    #[test]
    fn marginal_coverage_sums_to_total() {
        let store = TileStore::new(Box::new(FnTileSource::new(|_, _| 0.0)), TileCacheConfig::default());
        let sampler = flat_sampler(&store);

        let bbox = GeoBBox::new(-0.05, -0.05, 0.05, 0.05).unwrap();
        let affine = GridAffine::new(bbox, 200, 200);

        let options = ViewshedOptions { radius_m: 2000.0, resolution_m: 100.0, ..Default::default() };
        let raster_a = compute_viewshed(&sampler, 0.0, 0.0, options);
        let raster_b = compute_viewshed(&sampler, 0.01, 0.0, options);

        let coverages = vec![
            project_to_master_grid(&raster_a, &affine),
            project_to_master_grid(&raster_b, &affine),
        ];
        let node_coords = vec![(0.0, 0.0, 10.0), (0.01, 0.0, 10.0)];

        let result = composite(
            &affine,
            &[0, 1],
            &coverages,
            &node_coords,
            &sampler,
            100.0,
            LinkOptions::default(),
        );

        let summed: f64 = result.sites.iter().map(|s| s.marginal_coverage_km2).sum();
        assert!((summed - result.total_unique_coverage_km2).abs() < 1e-6);
    }

    #[test]
    fn single_site_connectivity_score_is_zero() {
        let store = TileStore::new(Box::new(FnTileSource::new(|_, _| 0.0)), TileCacheConfig::default());
        let sampler = flat_sampler(&store);
        let bbox = GeoBBox::new(-0.05, -0.05, 0.05, 0.05).unwrap();
        let affine = GridAffine::new(bbox, 100, 100);
        let options = ViewshedOptions { radius_m: 1000.0, resolution_m: 100.0, ..Default::default() };
        let raster = compute_viewshed(&sampler, 0.0, 0.0, options);
        let coverages = vec![project_to_master_grid(&raster, &affine)];
        let node_coords = vec![(0.0, 0.0, 10.0)];

        let result = composite(&affine, &[0], &coverages, &node_coords, &sampler, 100.0, LinkOptions::default());
        assert_eq!(result.sites[0].connectivity_score, 0);
        assert!(result.links.is_empty());
    }

    #[test]
    fn link_status_depends_on_each_sites_own_antenna_height() {
        // A 40m ridge at the midpoint of a 5km east-west link: short masts can't see
        // over it, tall masts can. If the link analysis ever falls back to a shared
        // default height instead of each site's own, both cases come out identical.
        let store = TileStore::new(
            Box::new(FnTileSource::new(|lat, lon| {
                let north_m = lat * crate::geo_coord::METERS_PER_DEGREE_LAT;
                let east_m = lon * crate::geo_coord::METERS_PER_DEGREE_LAT;
                if north_m.abs() < 60.0 && (2450.0..=2550.0).contains(&east_m) {
                    40.0
                } else {
                    0.0
                }
            })),
            TileCacheConfig::default(),
        );
        let sampler = flat_sampler(&store);
        let bbox = GeoBBox::new(-0.05, -0.05, 0.05, 0.05).unwrap();
        let affine = GridAffine::new(bbox, 10, 10);
        let coverages = vec![CandidateCoverage::from_indices(vec![]), CandidateCoverage::from_indices(vec![])];

        let lon_span_deg = 5000.0 / crate::geo_coord::METERS_PER_DEGREE_LAT;
        let low = vec![(0.0, 0.0, 5.0), (0.0, lon_span_deg, 5.0)];
        let tall = vec![(0.0, 0.0, 60.0), (0.0, lon_span_deg, 60.0)];

        let result_low =
            composite(&affine, &[0, 1], &coverages, &low, &sampler, 100.0, LinkOptions::default());
        let result_tall =
            composite(&affine, &[0, 1], &coverages, &tall, &sampler, 100.0, LinkOptions::default());

        assert_eq!(result_low.links[0].status, LinkStatus::Blocked);
        assert_eq!(result_tall.links[0].status, LinkStatus::Viable);
    }

    #[test]
    fn coincident_selected_sites_produce_unknown_link_not_a_panic() {
        let store = TileStore::new(Box::new(FnTileSource::new(|_, _| 0.0)), TileCacheConfig::default());
        let sampler = flat_sampler(&store);
        let bbox = GeoBBox::new(-0.05, -0.05, 0.05, 0.05).unwrap();
        let affine = GridAffine::new(bbox, 100, 100);
        let options = ViewshedOptions { radius_m: 1000.0, resolution_m: 100.0, ..Default::default() };
        let raster = compute_viewshed(&sampler, 0.0, 0.0, options);
        let coverages = vec![project_to_master_grid(&raster, &affine), project_to_master_grid(&raster, &affine)];
        let node_coords = vec![(0.0, 0.0, 10.0), (0.0, 0.0, 10.0)];

        let result =
            composite(&affine, &[0, 1], &coverages, &node_coords, &sampler, 100.0, LinkOptions::default());
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].status, LinkStatus::Unknown);
    }
}
