//! Seeded random trees for simulation studies.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Exp;

use crate::domain::{Lineage, Tree};
use crate::error::FitError;

struct Proto {
    parent: Option<usize>,
    length: f64,
    name: String,
}

/// Pure-birth (Yule) tree with `ntips` tips, rescaled to root height 1.
///
/// Tips are named `t0..`, internal nodes `n1..` in order of splitting and the
/// root `root`. The same `(ntips, seed)` always yields the same tree.
pub fn yule_tree(ntips: usize, seed: u64) -> Result<Tree, FitError> {
    if ntips < 2 {
        return Err(FitError::InvalidInput(format!(
            "a random tree needs at least 2 tips, got {ntips}"
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let mut nodes = vec![Proto {
        parent: None,
        length: 0.0,
        name: "root".to_string(),
    }];
    let mut active = Vec::with_capacity(ntips);
    for _ in 0..2 {
        nodes.push(Proto {
            parent: Some(0),
            length: 0.0,
            name: String::new(),
        });
        active.push(nodes.len() - 1);
    }

    let mut next_internal = 1;
    loop {
        // Waiting time until the next speciation among `active` lineages.
        let waiting = Exp::new(active.len() as f64)
            .map_err(|e| FitError::InvalidInput(format!("waiting time distribution: {e}")))?;
        let dt = waiting.sample(&mut rng);
        for &a in &active {
            nodes[a].length += dt;
        }
        if active.len() == ntips {
            break;
        }

        let parent = active.remove(rng.gen_range(0..active.len()));
        nodes[parent].name = format!("n{next_internal}");
        next_internal += 1;
        for _ in 0..2 {
            nodes.push(Proto {
                parent: Some(parent),
                length: 0.0,
                name: String::new(),
            });
            active.push(nodes.len() - 1);
        }
    }

    for (i, &a) in active.iter().enumerate() {
        nodes[a].name = format!("t{i}");
    }

    let lineages = nodes
        .iter()
        .map(|n| Lineage {
            id: n.name.clone(),
            parent: n.parent.map(|p| nodes[p].name.clone()),
            branch_length: n.length,
        })
        .collect();
    Tree::new(lineages)?.scaled_to_root_height(1.0)
}
