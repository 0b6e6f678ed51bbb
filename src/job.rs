//! Batch job orchestration: the external boundary (§4.7, §6). Accepts a JSON-shaped
//! request, derives the master grid, drives Viewshed -> SiteSelector -> Compositor,
//! and assembles the JSON-shaped result, publishing progress checkpoints between
//! stages only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compositor::{composite, project_to_master_grid};
use crate::elevation_sampler::ElevationSampler;
use crate::error::MeshRfError;
use crate::geo_coord::{GeoBBox, GeoPoint, GridAffine, METERS_PER_DEGREE_LAT};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::rf_physics::LinkOptions;
use crate::site_selector::select_sites;
use crate::tile_store::TileStore;
use crate::viewshed::{compute_viewshed, ViewshedOptions};

/// Target master-grid resolution before any cap-driven coarsening (§4.7).
const TARGET_RES_M: f64 = 100.0;

/// Side length beyond which the master grid is coarsened rather than allowed to grow,
/// per §7's `ResourceExceeded` policy (fail only if coarsening still cannot fit).
const MAX_DIM: usize = 4096;

/// Safety margin added to every node's viewshed radius when deriving the shared
/// bounding box, matching the original batch pipeline's `radius + 1000`.
const BBOX_BUFFER_MARGIN_M: f64 = 1000.0;

/// One node in the batch request.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeInput {
    #[serde(default)]
    pub id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub radius: Option<f64>,
}

fn default_height() -> f64 {
    10.0
}

/// Job-wide tunables, each independently overridable; defaults match §6.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub radius: f64,
    pub optimize_n: Option<usize>,
    pub rx_height: f64,
    pub frequency_mhz: f64,
    pub k_factor: f64,
    pub clutter_height: f64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            radius: 5000.0,
            optimize_n: None,
            rx_height: 2.0,
            frequency_mhz: 915.0,
            k_factor: 1.333,
            clutter_height: 0.0,
        }
    }
}

/// A full batch job request, deserialized directly from the JSON payload of §6.
#[derive(Clone, Debug, Deserialize)]
pub struct JobRequest {
    pub nodes: Vec<NodeInput>,
    #[serde(default)]
    pub options: JobOptions,
}

#[derive(Clone, Debug, Serialize)]
pub struct SiteOutput {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
    pub elevation: f64,
    pub coverage_area_km2: f64,
    pub marginal_coverage_km2: f64,
    pub unique_coverage_pct: f64,
    pub connectivity_score: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct LinkOutput {
    pub node_a_idx: usize,
    pub node_b_idx: usize,
    pub node_a_name: String,
    pub node_b_name: String,
    pub dist_km: f64,
    pub status: crate::rf_physics::LinkStatus,
    pub path_loss_db: f64,
    pub min_clearance_ratio: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompositeBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompositeOutput {
    pub image: String,
    pub bounds: CompositeBounds,
}

/// Outcome of a job run: completion or cooperative cancellation (§7).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status")]
pub enum JobOutcome {
    #[serde(rename = "completed")]
    Completed {
        #[serde(flatten)]
        result: Box<JobResultBody>,
    },
    #[serde(rename = "canceled")]
    Canceled,
}

/// `JobResult` minus the `status` tag, so it can be flattened under either the
/// "completed" outcome or returned standalone by [`run_job`].
#[derive(Clone, Debug, Serialize)]
pub struct JobResultBody {
    pub results: Vec<SiteOutput>,
    pub inter_node_links: Vec<LinkOutput>,
    pub total_unique_coverage_km2: f64,
    pub composite: CompositeOutput,
}

/// A cooperative cancellation flag, checked between candidates and between ray-chunks
/// (§5). Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one batch job end to end. Idempotent: identical inputs (and an identical
/// `TileStore` cache state) produce an identical result.
pub fn run_job(
    request: &JobRequest,
    store: &TileStore,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<JobOutcome, MeshRfError> {
    validate_request(request)?;

    progress.on_progress(ProgressEvent { progress: 0.0, message: "Initializing...".to_string() });

    let sampler = ElevationSampler::new(store);

    let points: Vec<GeoPoint> = request
        .nodes
        .iter()
        .map(|n| GeoPoint::with_height(n.lat, n.lon, Some(n.height)))
        .collect::<Result<_, String>>()
        .map_err(MeshRfError::InvalidInput)?;

    let buffer_m = request.options.radius + BBOX_BUFFER_MARGIN_M;
    let bbox = GeoBBox::enclosing(&points, buffer_m).map_err(MeshRfError::InvalidInput)?;

    let (rows, cols, res_m) = derive_grid_dimensions(&bbox)?;
    let affine = GridAffine::new(bbox, rows, cols);

    let total = request.nodes.len();
    let mut node_coords = Vec::with_capacity(total);
    let mut node_names = Vec::with_capacity(total);
    let mut candidate_coverages = Vec::with_capacity(total);
    let mut elevations = Vec::with_capacity(total);
    let mut coverage_area_km2 = Vec::with_capacity(total);

    for (i, node) in request.nodes.iter().enumerate() {
        if cancel.is_canceled() {
            return Ok(JobOutcome::Canceled);
        }

        let radius_m = node.radius.unwrap_or(request.options.radius);
        let name = node.name.clone().unwrap_or_else(|| format!("Site {}", i + 1));

        let viewshed_options = ViewshedOptions {
            radius_m,
            resolution_m: res_m,
            tx_height_m: node.height,
            rx_height_m: request.options.rx_height,
            frequency_mhz: request.options.frequency_mhz,
            k_factor: request.options.k_factor,
        };

        let raster = compute_viewshed(&sampler, node.lat, node.lon, viewshed_options);
        let (elevation, _) = sampler.elevation_with_coverage(node.lat, node.lon);
        let coverage_km2 = raster.visible_count() as f64 * res_m * res_m / 1_000_000.0;

        node_coords.push((node.lat, node.lon, node.height));
        node_names.push(name);
        elevations.push(elevation as f64);
        coverage_area_km2.push(coverage_km2);
        candidate_coverages.push(project_to_master_grid(&raster, &affine));

        let progress_pct = (i + 1) as f64 / total as f64 * 50.0;
        progress.on_progress(ProgressEvent {
            progress: progress_pct,
            message: format!("Analyzed candidates {}/{}", i + 1, total),
        });
    }

    if cancel.is_canceled() {
        return Ok(JobOutcome::Canceled);
    }

    let selection = select_sites(&candidate_coverages, request.options.optimize_n);

    progress.on_progress(ProgressEvent {
        progress: 55.0,
        message: "Analyzing inter-node links...".to_string(),
    });

    let link_options = LinkOptions {
        frequency_mhz: request.options.frequency_mhz,
        k_factor: request.options.k_factor,
        clutter_height_m: request.options.clutter_height,
        path_loss_budget_db: LinkOptions::default().path_loss_budget_db,
    };

    let composite_result = composite(
        &affine,
        &selection.selected_indices,
        &candidate_coverages,
        &node_coords,
        &sampler,
        res_m,
        link_options,
    );

    let results: Vec<SiteOutput> = composite_result
        .sites
        .iter()
        .map(|site| {
            let idx = site.candidate_index;
            SiteOutput {
                lat: node_coords[idx].0,
                lon: node_coords[idx].1,
                name: node_names[idx].clone(),
                elevation: elevations[idx],
                coverage_area_km2: coverage_area_km2[idx],
                marginal_coverage_km2: site.marginal_coverage_km2,
                unique_coverage_pct: site.unique_coverage_pct,
                connectivity_score: site.connectivity_score,
            }
        })
        .collect();

    let inter_node_links: Vec<LinkOutput> = composite_result
        .links
        .iter()
        .map(|link| LinkOutput {
            node_a_idx: link.node_a_idx,
            node_b_idx: link.node_b_idx,
            node_a_name: node_names[selection.selected_indices[link.node_a_idx]].clone(),
            node_b_name: node_names[selection.selected_indices[link.node_b_idx]].clone(),
            dist_km: link.dist_km,
            status: link.status,
            path_loss_db: link.path_loss_db,
            min_clearance_ratio: link.min_clearance_ratio,
        })
        .collect();

    progress.on_progress(ProgressEvent { progress: 100.0, message: "Completed".to_string() });

    Ok(JobOutcome::Completed {
        result: Box::new(JobResultBody {
            results,
            inter_node_links,
            total_unique_coverage_km2: composite_result.total_unique_coverage_km2,
            composite: CompositeOutput {
                image: composite_result.image_base64,
                bounds: CompositeBounds {
                    north: composite_result.bounds.0,
                    south: composite_result.bounds.1,
                    east: composite_result.bounds.2,
                    west: composite_result.bounds.3,
                },
            },
        }),
    })
}

fn validate_request(request: &JobRequest) -> Result<(), MeshRfError> {
    if request.nodes.is_empty() {
        return Err(MeshRfError::InvalidInput("node list must not be empty".to_string()));
    }
    for (i, node) in request.nodes.iter().enumerate() {
        if !node.lat.is_finite() || !(-90.0..=90.0).contains(&node.lat) {
            return Err(MeshRfError::InvalidInput(format!("node {i}: latitude out of range")));
        }
        if !node.lon.is_finite() || !(-180.0..=180.0).contains(&node.lon) {
            return Err(MeshRfError::InvalidInput(format!("node {i}: longitude out of range")));
        }
        if let Some(r) = node.radius {
            if !r.is_finite() || r <= 0.0 {
                return Err(MeshRfError::InvalidInput(format!("node {i}: radius must be positive")));
            }
        }
    }
    if !request.options.radius.is_finite() || request.options.radius <= 0.0 {
        return Err(MeshRfError::InvalidInput("options.radius must be positive".to_string()));
    }
    if let Some(n) = request.options.optimize_n {
        if n > request.nodes.len() {
            return Err(MeshRfError::InvalidInput(format!(
                "optimize_n ({n}) exceeds node count ({})",
                request.nodes.len()
            )));
        }
    }
    Ok(())
}

/// Derives master-grid row/col counts and resolution from a bounding box, capping the
/// grid at [`MAX_DIM`] per side by coarsening resolution rather than failing
/// (§4.7, §7). Fails only if `MAX_DIM` cannot be reached by coarsening.
fn derive_grid_dimensions(bbox: &GeoBBox) -> Result<(usize, usize, f64), MeshRfError> {
    let lat_deg_per_m = 1.0 / METERS_PER_DEGREE_LAT;
    let lon_deg_per_m = 1.0 / (METERS_PER_DEGREE_LAT * bbox.mean_lat().to_radians().cos().abs().max(0.001));

    let lat_span = bbox.max_lat() - bbox.min_lat();
    let lon_span = bbox.max_lon() - bbox.min_lon();

    let mut res_m = TARGET_RES_M;
    let mut rows = (lat_span / (res_m * lat_deg_per_m)) as usize;
    let mut cols = (lon_span / (res_m * lon_deg_per_m)) as usize;

    if rows > MAX_DIM || cols > MAX_DIM {
        let scale_factor = (rows as f64 / MAX_DIM as f64).max(cols as f64 / MAX_DIM as f64);
        res_m = TARGET_RES_M * scale_factor;
        rows = (lat_span / (res_m * lat_deg_per_m)) as usize;
        cols = (lon_span / (res_m * lon_deg_per_m)) as usize;
        log::warn!("viewshed grid too large, scaling resolution from {TARGET_RES_M}m to {res_m:.1}m ({rows}x{cols})");
    }

    if rows == 0 || cols == 0 {
        return Err(MeshRfError::InvalidInput(
            "bounding box collapsed to an empty grid".to_string(),
        ));
    }
    if rows > MAX_DIM || cols > MAX_DIM {
        return Err(MeshRfError::ResourceExceeded(format!(
            "master grid {rows}x{cols} exceeds {MAX_DIM}x{MAX_DIM} even after coarsening resolution"
        )));
    }

    Ok((rows, cols, res_m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_store::{FnTileSource, TileCacheConfig};

    fn flat_store() -> TileStore {
        TileStore::new(Box::new(FnTileSource::new(|_, _| 0.0)), TileCacheConfig::default())
    }

    #[test]
    fn rejects_empty_node_list() {
        let request = JobRequest { nodes: vec![], options: JobOptions::default() };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn rejects_optimize_n_over_node_count() {
        let request = JobRequest {
            nodes: vec![NodeInput { id: None, lat: 0.0, lon: 0.0, height: 10.0, name: None, radius: None }],
            options: JobOptions { optimize_n: Some(5), ..Default::default() },
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn flat_ocean_single_node_matches_expected_area() {
        // E1: one node at (0,0,10m), radius 2000, flat terrain.
        let store = flat_store();
        let request = JobRequest {
            nodes: vec![NodeInput {
                id: None,
                lat: 0.0,
                lon: 0.0,
                height: 10.0,
                name: None,
                radius: Some(2000.0),
            }],
            options: JobOptions { radius: 2000.0, ..Default::default() },
        };

        let outcome =
            run_job(&request, &store, &crate::progress::NullProgressSink, &CancelToken::new()).unwrap();
        let JobOutcome::Completed { result } = outcome else { panic!("expected completion") };
        let expected = std::f64::consts::PI * 4.0;
        let actual = result.results[0].coverage_area_km2;
        assert!((actual / expected - 1.0).abs() < 0.1, "actual={actual} expected={expected}");
    }

    #[test]
    fn coincident_nodes_dedup_under_optimize_n() {
        // E2: two coincident nodes, optimize_n = 2 -> only one selected contributes.
        let store = flat_store();
        let node = NodeInput { id: None, lat: 10.0, lon: 10.0, height: 10.0, name: None, radius: None };
        let request = JobRequest {
            nodes: vec![node.clone(), node],
            options: JobOptions { radius: 1000.0, optimize_n: Some(2), ..Default::default() },
        };

        let outcome =
            run_job(&request, &store, &crate::progress::NullProgressSink, &CancelToken::new()).unwrap();
        let JobOutcome::Completed { result } = outcome else { panic!("expected completion") };
        assert_eq!(result.results.len(), 1);
    }

    #[test]
    fn cancellation_before_any_node_returns_canceled() {
        let store = flat_store();
        let request = JobRequest {
            nodes: vec![NodeInput { id: None, lat: 0.0, lon: 0.0, height: 10.0, name: None, radius: None }],
            options: JobOptions::default(),
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = run_job(&request, &store, &crate::progress::NullProgressSink, &cancel).unwrap();
        assert!(matches!(outcome, JobOutcome::Canceled));
    }

    #[test]
    fn wide_area_scales_resolution_without_resource_exceeded() {
        // E6: nodes spread over ~1000 km with 10 km radius should coarsen resolution
        // rather than fail.
        let points = [
            GeoPoint::new(0.0, 0.0).unwrap(),
            GeoPoint::new(9.0, 9.0).unwrap(),
        ];
        let bbox = GeoBBox::enclosing(&points, 10_000.0 + BBOX_BUFFER_MARGIN_M).unwrap();
        let (rows, cols, res_m) = derive_grid_dimensions(&bbox).unwrap();
        assert!(rows <= MAX_DIM && cols <= MAX_DIM);
        assert!(res_m >= 244.0, "res_m={res_m}");
    }
}
