// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Builds each node's Maekawa quorum from the ⌈√N⌉×⌈√N⌉ grid: a node's
//! quorum is the union of its row and its column, padded with random ids
//! when the grid has short rows so every quorum has the same size.
//!
//! For non-square N the padding does not guarantee the pairwise
//! intersection property Maekawa safety relies on (see DESIGN.md).
//!
//! N=2 is a degenerate case the padding loop cannot satisfy at all:
//! `2*ceil(sqrt(2))-1 = 3` exceeds the 2 ids that exist, so the caller must
//! not run this algorithm with exactly two nodes (see DESIGN.md).

use rand::Rng;
use std::collections::BTreeSet;

use crate::message::NodeId;

/// Computes node `id`'s quorum among `num_nodes` peers (excluding `id`
/// itself). Size is exactly `2*ceil(sqrt(num_nodes)) - 1`.
pub fn build_quorum(id: NodeId, num_nodes: u32, rng: &mut impl Rng) -> Vec<NodeId> {
    assert!(num_nodes > 0, "num_nodes must be positive");
    assert!(id < num_nodes, "id must be within [0, num_nodes)");

    let m = (num_nodes as f64).sqrt().ceil() as u32;
    let row = id / m;
    let col = id % m;

    let mut colleagues: BTreeSet<NodeId> = BTreeSet::new();

    for j in 0..m {
        let pos = row * m + j;
        if pos >= num_nodes {
            break;
        }
        colleagues.insert(pos);
    }

    for i in 0..m {
        let pos = i * m + col;
        if pos >= num_nodes {
            continue;
        }
        colleagues.insert(pos);
    }

    let target_size = (2 * m - 1) as usize;
    while colleagues.len() < target_size {
        colleagues.insert(rng.gen_range(0..num_nodes));
    }

    colleagues.remove(&id);
    colleagues.into_iter().collect()
}
