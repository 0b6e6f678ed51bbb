//! Greedy maximum-coverage site selection over packed master-grid pixel sets.
//!
//! Candidate coverage is represented as sorted, deduplicated row-major pixel indices
//! rather than hash sets (§9 Design Notes): set-difference and union become linear
//! merges over sorted slices, which is both faster and branch-predictable than hashing.

/// One candidate's projected coverage: its packed master-grid pixel indices, sorted
/// and deduplicated.
#[derive(Clone, Debug)]
pub struct CandidateCoverage {
    pub pixels: Vec<u64>,
}

impl CandidateCoverage {
    /// Builds a candidate from unsorted, possibly duplicate pixel indices.
    pub fn from_indices(mut pixels: Vec<u64>) -> Self {
        pixels.sort_unstable();
        pixels.dedup();
        Self { pixels }
    }

    /// Count of pixels in `self.pixels` not present in the sorted `covered` slice.
    fn new_pixel_count(&self, covered: &[u64]) -> usize {
        let mut i = 0;
        let mut j = 0;
        let mut count = 0;
        while i < self.pixels.len() && j < covered.len() {
            match self.pixels[i].cmp(&covered[j]) {
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
        count += self.pixels.len() - i;
        count
    }
}

/// Merges `addition` into the sorted, deduplicated `covered` vector in place.
fn merge_into(covered: &mut Vec<u64>, addition: &[u64]) {
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

/// Result of the greedy selection: the chosen candidate indices in selection order,
/// and the marginal gain (new pixel count) of each pick.
#[derive(Clone, Debug)]
pub struct SelectionResult {
    pub selected_indices: Vec<usize>,
    pub marginal_gains: Vec<usize>,
}

/// Greedily selects up to `n` candidates maximizing cumulative coverage. `n = None`
/// selects every candidate (no-op, §4.5). Ties on marginal gain break by lowest
/// input index so the result is deterministic given identical candidate rasters.
pub fn select_sites(candidates: &[CandidateCoverage], n: Option<usize>) -> SelectionResult {
    let target = n.unwrap_or(candidates.len()).min(candidates.len());

    if n.is_none() {
        return SelectionResult {
            selected_indices: (0..candidates.len()).collect(),
            marginal_gains: candidates.iter().map(|c| c.pixels.len()).collect(),
        };
    }

    let mut covered: Vec<u64> = Vec::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected_indices = Vec::with_capacity(target);
    let mut marginal_gains = Vec::with_capacity(target);

    while selected_indices.len() < target {
        let mut best_idx_pos = None;
        let mut best_gain = 0usize;
        for (pos, &idx) in remaining.iter().enumerate() {
            let gain = candidates[idx].new_pixel_count(&covered);
            if gain > best_gain {
                best_gain = gain;
                best_idx_pos = Some(pos);
            }
        }

        let Some(pos) = best_idx_pos else {
            break; // best marginal gain is 0: terminate early (§4.5)
        };

        let chosen = remaining.remove(pos);
        merge_into(&mut covered, &candidates[chosen].pixels);
        selected_indices.push(chosen);
        marginal_gains.push(best_gain);
    }

    SelectionResult { selected_indices, marginal_gains }
}
