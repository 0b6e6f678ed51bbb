//! Top-level error type surfaced from the compute pipeline to the orchestrator boundary.

use std::fmt;

use crate::tile::TileKey;

/// Every failure mode the pipeline can report, per the error-handling design: most are
/// logged and absorbed so the job continues, a few fail the whole job outright.
#[derive(Debug)]
pub enum MeshRfError {
    /// Malformed request: out-of-range coordinates, non-finite numbers, empty node list,
    /// `optimize_n` larger than the candidate count. Fails the job fast.
    InvalidInput(String),

    /// Upstream tile fetch failed. Non-fatal to the job: the affected samples fall back
    /// to elevation 0.
    TileFetch { key: TileKey, cause: String },

    /// Downloaded tile bytes did not decode as a terrain-RGB PNG. Non-fatal, same fallback
    /// as `TileFetch`.
    TileDecode { key: TileKey, cause: String },

    /// Link analysis between two selected sites failed. Non-fatal: the link is recorded
    /// with `status: unknown`.
    LinkAnalysis { a_idx: usize, b_idx: usize, cause: String },

    /// The master grid would exceed 4096x4096 even after scaling resolution up. Fails
    /// the job rather than silently shrinking further.
    ResourceExceeded(String),

    /// The job was canceled cooperatively between stages.
    Canceled,
}

impl fmt::Display for MeshRfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshRfError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MeshRfError::TileFetch { key, cause } => {
                write!(f, "failed to fetch tile {key:?}: {cause}")
            }
            MeshRfError::TileDecode { key, cause } => {
                write!(f, "failed to decode tile {key:?}: {cause}")
            }
            MeshRfError::LinkAnalysis { a_idx, b_idx, cause } => {
                write!(f, "link analysis failed for sites {a_idx}-{b_idx}: {cause}")
            }
            MeshRfError::ResourceExceeded(msg) => write!(f, "resource budget exceeded: {msg}"),
            MeshRfError::Canceled => write!(f, "job canceled"),
        }
    }
}

impl std::error::Error for MeshRfError {}

pub type Result<T> = std::result::Result<T, MeshRfError>;
