use rayon::prelude::*;

use crate::box_array::BoxArray;
use crate::index_space::SPACE_DIM;

/// Bits taken from each coordinate when interleaving. Coordinates are
/// doubled centroids relative to the bounding box, so this covers index
/// spaces up to 2^39 cells on a side.
const BITS_PER_AXIS: u32 = 40;

/// Return the box indexes ordered along a Morton (Z-order) curve through the
/// box centroids. Boxes with equal keys keep their box array order.
pub(crate) fn curve_order(boxes: &BoxArray) -> Vec<usize> {
    let origin = match boxes.minimal_box() {
        Some(bounds) => bounds.lo(),
        None => return Vec::new(),
    };

    let mut keyed: Vec<(u128, usize)> = boxes
        .as_slice()
        .par_iter()
        .enumerate()
        .map(|(i, b)| {
            // Twice the centroid is a whole number of cells.
            let center = b.centroid();
            let mut coords = [0u64; SPACE_DIM];
            for a in 0..SPACE_DIM {
                coords[a] = ((2.0 * center[a]) as i64 - 2 * origin[a]) as u64;
            }
            (morton_key(coords), i)
        })
        .collect();

    keyed.sort_unstable();
    keyed.into_iter().map(|(_, i)| i).collect()
}

/// Interleave the coordinate bits, most significant first, axis 0 leading.
pub(crate) fn morton_key(coords: [u64; SPACE_DIM]) -> u128 {
    let mut key = 0u128;
    for bit in (0..BITS_PER_AXIS).rev() {
        for c in coords.iter() {
            key = (key << 1) | ((c >> bit) & 1) as u128;
        }
    }
    key
}

/// Walk the curve and cut it into at most `nprocs` contiguous runs. A new
/// run starts whenever adding the next box would push the current run past
/// `balance * total / nprocs`; whatever is left goes to the last rank.
pub(crate) fn partition(order: &[usize], weights: &[u64], nprocs: usize, balance: f64) -> Vec<usize> {
    let total: u64 = weights.iter().sum();
    let target = balance * total as f64 / nprocs as f64;

    let mut assignment = vec![0; weights.len()];
    let mut rank = 0;
    let mut load = 0u64;

    for &i in order {
        let w = weights[i];
        if load > 0 && rank + 1 < nprocs && (load + w) as f64 > target {
            rank += 1;
            load = 0;
        }
        assignment[i] = rank;
        load += w;
    }
    assignment
}
