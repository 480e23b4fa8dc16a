// Random picker: partial Fisher-Yates shuffle.
//
// Yields k distinct elements drawn uniformly from a slice of length N in
// O(k) time and auxiliary state, without materializing a shuffled copy of
// the whole slice. Uses `rand` 0.9's `Rng::random_range`/`rng()` idiom.

use crate::address::Address;
use crate::membership::AliveTable;
use rand::Rng;
use std::collections::HashMap;

/// Draw `k` distinct indices from `0..n` uniformly at random, using a
/// partial Fisher-Yates shuffle over a sparse swap map so only the touched
/// positions are materialized.
pub fn pick_indices<R: Rng>(rng: &mut R, n: usize, k: usize) -> Vec<usize> {
    let k = k.min(n);
    let mut swap_map: HashMap<usize, usize> = HashMap::new();
    let mut picked = Vec::with_capacity(k);

    let effective = |swap_map: &HashMap<usize, usize>, i: usize| -> usize {
        *swap_map.get(&i).unwrap_or(&i)
    };

    for i in 0..k {
        let j = if n - i <= 1 { i } else { rng.random_range(i..n) };
        let effective_j = effective(&swap_map, j);
        picked.push(effective_j);
        let effective_i = effective(&swap_map, i);
        swap_map.insert(j, effective_i);
    }
    picked
}

/// Pick `k` distinct members from the alive table, uniformly at random.
pub fn pick<R: Rng>(rng: &mut R, table: &AliveTable, k: usize) -> Vec<Address> {
    pick_indices(rng, table.len(), k)
        .into_iter()
        .filter_map(|idx| table.get_by_index(idx).map(|m| m.address))
        .collect()
}

/// Pick `k` distinct members from the alive table excluding `exclude`,
/// requesting one extra draw to absorb the exclusion and silently
/// dropping `exclude` if it appears.
pub fn pick_without<R: Rng>(rng: &mut R, table: &AliveTable, exclude: Address, k: usize) -> Vec<Address> {
    let over_draw = (k + 1).min(table.len());
    let mut picked: Vec<Address> = pick_indices(rng, table.len(), over_draw)
        .into_iter()
        .filter_map(|idx| table.get_by_index(idx).map(|m| m.address))
        .filter(|a| *a != exclude)
        .collect();
    picked.truncate(k);
    picked
}
