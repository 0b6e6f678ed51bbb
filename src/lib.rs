//! Terrain-aware RF coverage and link-quality analysis for mesh-network planning.
//!
//! The pipeline runs, in dependency order: [`tile_store`] (cached terrain-RGB tile
//! fetch) feeding [`elevation_sampler`] (point/profile/batch sampling), feeding
//! [`viewshed`] (per-site radial visibility sweep) and [`rf_physics`] (link budget
//! and diffraction), combined by [`site_selector`] (greedy max-coverage) and
//! [`compositor`] (master-grid blit, PNG render, link matrix), orchestrated end to
//! end by [`job`].

pub mod compositor;
pub mod elevation_sampler;
pub mod error;
pub mod geo_coord;
pub mod job;
pub mod progress;
pub mod rf_physics;
pub mod site_selector;
pub mod tile;
pub mod tile_store;
pub mod viewshed;

pub use error::{MeshRfError, Result};
