//! End-to-end batch-job scenarios run through the public `meshrf` API against
//! synthetic terrain, one per literal testable-properties scenario.

use meshrf::job::{run_job, CancelToken, JobOptions, JobOutcome, JobRequest, NodeInput};
use meshrf::progress::NullProgressSink;
use meshrf::tile_store::{FnTileSource, TileCacheConfig, TileStore};

fn flat_store() -> TileStore {
    TileStore::new(Box::new(FnTileSource::new(|_, _| 0.0)), TileCacheConfig::default())
}

fn node(lat: f64, lon: f64, height: f64, name: &str, radius: Option<f64>) -> NodeInput {
    NodeInput { id: None, lat, lon, height, name: Some(name.to_string()), radius }
}

fn completed(outcome: JobOutcome) -> meshrf::job::JobResultBody {
    match outcome {
        JobOutcome::Completed { result } => *result,
        JobOutcome::Canceled => panic!("expected a completed job"),
    }
}

#[test]
fn e1_flat_ocean_coverage_matches_expected_disk_area() {
    let store = flat_store();
    let request = JobRequest {
        nodes: vec![node(0.0, 0.0, 10.0, "Site 1", Some(2000.0))],
        options: JobOptions { radius: 2000.0, frequency_mhz: 915.0, ..Default::default() },
    };

    let outcome = run_job(&request, &store, &NullProgressSink, &CancelToken::new()).unwrap();
    let result = completed(outcome);

    let expected_km2 = std::f64::consts::PI * 4.0;
    let actual_km2 = result.results[0].coverage_area_km2;
    assert!(
        (actual_km2 / expected_km2 - 1.0).abs() < 0.1,
        "expected ~{expected_km2} km2, got {actual_km2}"
    );
}

#[test]
fn e2_coincident_sites_dedup_to_zero_marginal_gain() {
    let store = flat_store();
    let site = node(10.0, 10.0, 10.0, "Duplicate", None);
    let request = JobRequest {
        nodes: vec![site.clone(), site],
        options: JobOptions { radius: 1000.0, optimize_n: Some(2), ..Default::default() },
    };

    let outcome = run_job(&request, &store, &NullProgressSink, &CancelToken::new()).unwrap();
    let result = completed(outcome);

    // Greedy selection terminates early once marginal gain hits 0, so only one site
    // survives into the result set.
    assert_eq!(result.results.len(), 1);
    assert!((result.results[0].marginal_coverage_km2 - result.results[0].coverage_area_km2).abs() < 1e-6);
}

#[test]
fn e3_knife_edge_ridge_blocks_link() {
    // Two sites 5 km apart due east/west of each other with a 50m ridge at the
    // midpoint; flat terrain elsewhere.
    let store = TileStore::new(
        Box::new(FnTileSource::new(|lat, lon| {
            let north_m = lat * meshrf::geo_coord::METERS_PER_DEGREE_LAT;
            // latitude is 0 along this path, so cos(lat) == 1 and longitude scales
            // by the same constant as latitude.
            let east_m = lon * meshrf::geo_coord::METERS_PER_DEGREE_LAT;
            if north_m.abs() < 60.0 && (2450.0..=2550.0).contains(&east_m) {
                50.0
            } else {
                0.0
            }
        })),
        TileCacheConfig::default(),
    );

    let lon_span_deg = 5000.0 / meshrf::geo_coord::METERS_PER_DEGREE_LAT;
    let request = JobRequest {
        nodes: vec![
            node(0.0, 0.0, 10.0, "West", Some(3000.0)),
            node(0.0, lon_span_deg, 10.0, "East", Some(3000.0)),
        ],
        options: JobOptions { radius: 3000.0, optimize_n: None, ..Default::default() },
    };

    let outcome = run_job(&request, &store, &NullProgressSink, &CancelToken::new()).unwrap();
    let result = completed(outcome);

    assert_eq!(result.inter_node_links.len(), 1);
    let link = &result.inter_node_links[0];
    assert_eq!(link.status, meshrf::rf_physics::LinkStatus::Blocked);
    assert!(link.min_clearance_ratio > 1.0);
}

#[test]
fn e4_clear_flat_link_is_viable_with_expected_path_loss() {
    let store = flat_store();
    let lon_span_deg = 5000.0 / meshrf::geo_coord::METERS_PER_DEGREE_LAT;
    let request = JobRequest {
        nodes: vec![
            node(0.0, 0.0, 10.0, "West", Some(3000.0)),
            node(0.0, lon_span_deg, 10.0, "East", Some(3000.0)),
        ],
        options: JobOptions { radius: 3000.0, frequency_mhz: 915.0, ..Default::default() },
    };

    let outcome = run_job(&request, &store, &NullProgressSink, &CancelToken::new()).unwrap();
    let result = completed(outcome);

    let link = &result.inter_node_links[0];
    assert_eq!(link.status, meshrf::rf_physics::LinkStatus::Viable);
    assert!((link.path_loss_db - 105.6).abs() < 0.5, "path_loss_db={}", link.path_loss_db);
}

#[test]
fn e6_wide_area_job_scales_resolution_instead_of_failing() {
    let store = flat_store();
    let request = JobRequest {
        nodes: vec![node(0.0, 0.0, 10.0, "A", None), node(9.0, 9.0, 10.0, "B", None)],
        options: JobOptions { radius: 10_000.0, ..Default::default() },
    };

    let outcome = run_job(&request, &store, &NullProgressSink, &CancelToken::new());
    assert!(outcome.is_ok(), "job should scale resolution rather than fail: {outcome:?}");
}

#[test]
fn rejects_malformed_request_with_empty_nodes() {
    let store = flat_store();
    let request = JobRequest { nodes: vec![], options: JobOptions::default() };
    let outcome = run_job(&request, &store, &NullProgressSink, &CancelToken::new());
    assert!(matches!(outcome, Err(meshrf::MeshRfError::InvalidInput(_))));
}
