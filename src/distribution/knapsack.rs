use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Result of a knapsack partition: the rank of each box, and the ratio of the
/// mean rank load to the maximum rank load.
pub(crate) struct Knapsack {
    pub assignment: Vec<usize>,
    pub efficiency: f64,
}

/// Partition weighted boxes over `nprocs` bins. The greedy pass visits boxes
/// heaviest first (ties by box index) and drops each into the least-loaded
/// bin that still has room (ties by rank). If `full` is set, a local search
/// then swaps pairs of boxes between the heaviest bin and any other bin while
/// a swap lowers the heavier of the two, for at most `max_passes` swaps.
///
/// The caller guarantees `nprocs > 0` and `nmax * nprocs >= weights.len()`.
pub(crate) fn partition(
    weights: &[u64],
    nprocs: usize,
    full: bool,
    nmax: usize,
    max_passes: usize,
) -> Knapsack {
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].cmp(&weights[a]));

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); nprocs];
    let mut loads = vec![0u64; nprocs];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        (0..nprocs).map(|rank| Reverse((0, rank))).collect();

    for i in order {
        // Full bins are never pushed back, and capacity was checked up
        // front, so the heap cannot run dry here.
        let Reverse((load, rank)) = match heap.pop() {
            Some(entry) => entry,
            None => break,
        };
        bins[rank].push(i);
        loads[rank] = load + weights[i];

        if bins[rank].len() < nmax {
            heap.push(Reverse((loads[rank], rank)));
        }
    }

    if full {
        let mut passes = 0;
        while passes < max_passes && improve_heaviest(weights, &mut bins, &mut loads) {
            passes += 1;
        }
        log::debug!("knapsack local search made {} swaps", passes);
    }

    let mut assignment = vec![0; weights.len()];
    for (rank, bin) in bins.iter().enumerate() {
        for &i in bin {
            assignment[i] = rank;
        }
    }
    Knapsack {
        assignment,
        efficiency: efficiency(&loads),
    }
}

/// Apply the best swap between the heaviest bin and any other bin. Returns
/// false if no swap lowers the heaviest load.
fn improve_heaviest(weights: &[u64], bins: &mut [Vec<usize>], loads: &mut [u64]) -> bool {
    let heavy = match (0..loads.len()).max_by(|&a, &b| loads[a].cmp(&loads[b]).then(b.cmp(&a))) {
        Some(heavy) => heavy,
        None => return false,
    };
    let max_load = loads[heavy];

    // (resulting pair maximum, heavy slot, other rank, other slot)
    let mut best: Option<(u64, usize, usize, usize)> = None;

    for (a, &i) in bins[heavy].iter().enumerate() {
        for rank in (0..bins.len()).filter(|&r| r != heavy) {
            for (b, &j) in bins[rank].iter().enumerate() {
                if weights[j] >= weights[i] {
                    continue;
                }
                let new_heavy = max_load - weights[i] + weights[j];
                let new_other = loads[rank] - weights[j] + weights[i];
                let pair_max = new_heavy.max(new_other);

                if pair_max < max_load && best.map_or(true, |(m, ..)| pair_max < m) {
                    best = Some((pair_max, a, rank, b));
                }
            }
        }
    }

    match best {
        Some((_, a, rank, b)) => {
            let i = bins[heavy][a];
            let j = bins[rank][b];
            bins[heavy][a] = j;
            bins[rank][b] = i;
            loads[heavy] = loads[heavy] - weights[i] + weights[j];
            loads[rank] = loads[rank] - weights[j] + weights[i];
            true
        }
        None => false,
    }
}

/// Mean load over maximum load; 1.0 is a perfect balance.
pub(crate) fn efficiency(loads: &[u64]) -> f64 {
    let max = loads.iter().copied().max().unwrap_or(0);
    if max == 0 {
        1.0
    } else {
        let total: u64 = loads.iter().sum();
        total as f64 / (loads.len() as f64 * max as f64)
    }
}
