//! Rooted phylogenetic tree in arena representation.
//!
//! Lineages are stored in a flat `Vec` and refer to each other by index. The
//! tree loader is trusted to hand over a connected, acyclic, rooted topology;
//! construction only checks what is cheap to check (unique ids, a single root,
//! resolvable parents, finite non-negative branch lengths).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// A lineage record as supplied by the tree loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub id: String,
    /// `None` for the root.
    pub parent: Option<String>,
    /// Length of the branch leading to this lineage from its parent.
    pub branch_length: f64,
}

impl Lineage {
    pub fn new(id: impl Into<String>, parent: Option<&str>, branch_length: f64) -> Self {
        Self {
            id: id.into(),
            parent: parent.map(str::to_string),
            branch_length,
        }
    }
}

/// A node in the arena.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: String,
    pub parent: Option<usize>,
    pub branch_length: f64,
    pub children: Vec<usize>,
}

/// Immutable rooted tree with cached root-to-node depths.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: usize,
    depths: Vec<f64>,
    index: HashMap<String, usize>,
}

impl Tree {
    /// Build a tree from lineage records (any order).
    pub fn new(lineages: Vec<Lineage>) -> Result<Self, FitError> {
        if lineages.is_empty() {
            return Err(FitError::InvalidInput("tree has no lineages".to_string()));
        }

        let mut index = HashMap::with_capacity(lineages.len());
        for (i, lineage) in lineages.iter().enumerate() {
            if !(lineage.branch_length.is_finite() && lineage.branch_length >= 0.0) {
                return Err(FitError::InvalidInput(format!(
                    "lineage '{}' has invalid branch length {}",
                    lineage.id, lineage.branch_length
                )));
            }
            if index.insert(lineage.id.clone(), i).is_some() {
                return Err(FitError::InvalidInput(format!(
                    "duplicate lineage id '{}'",
                    lineage.id
                )));
            }
        }

        let mut nodes: Vec<TreeNode> = lineages
            .iter()
            .map(|l| TreeNode {
                id: l.id.clone(),
                parent: None,
                branch_length: l.branch_length,
                children: Vec::new(),
            })
            .collect();

        let mut root: Option<usize> = None;
        for (i, lineage) in lineages.iter().enumerate() {
            match &lineage.parent {
                None => {
                    if let Some(existing) = root {
                        return Err(FitError::InvalidInput(format!(
                            "multiple roots: '{}' and '{}'",
                            nodes[existing].id, lineage.id
                        )));
                    }
                    root = Some(i);
                }
                Some(parent_id) => {
                    let Some(&p) = index.get(parent_id) else {
                        return Err(FitError::InvalidInput(format!(
                            "lineage '{}' has unknown parent '{parent_id}'",
                            lineage.id
                        )));
                    };
                    nodes[i].parent = Some(p);
                    nodes[p].children.push(i);
                }
            }
        }

        let Some(root) = root else {
            return Err(FitError::InvalidInput("tree has no root".to_string()));
        };

        let depths = compute_depths(&nodes, root);
        Ok(Self {
            nodes,
            root,
            depths,
            index,
        })
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &TreeNode {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Arena index of a lineage id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn is_tip(&self, idx: usize) -> bool {
        self.nodes[idx].children.is_empty()
    }

    /// All tips in arena order.
    pub fn tips(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.is_tip(i)).collect()
    }

    /// `node` and everything below it, in pre-order.
    pub fn descendants(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            out.push(n);
            for &c in self.nodes[n].children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Tips below `node` (inclusive when `node` is itself a tip).
    pub fn tips_under(&self, node: usize) -> Vec<usize> {
        self.descendants(node)
            .into_iter()
            .filter(|&n| self.is_tip(n))
            .collect()
    }

    /// Path length from the root to `node`.
    pub fn depth(&self, node: usize) -> f64 {
        self.depths[node]
    }

    /// Height of the deepest tip above the root.
    pub fn root_height(&self) -> f64 {
        self.tips()
            .into_iter()
            .map(|t| self.depths[t])
            .fold(0.0, f64::max)
    }

    /// Most recent common ancestor of two nodes.
    pub fn mrca(&self, a: usize, b: usize) -> usize {
        let mut on_path = vec![false; self.nodes.len()];
        let mut cur = Some(a);
        while let Some(n) = cur {
            on_path[n] = true;
            cur = self.nodes[n].parent;
        }
        let mut cur = b;
        loop {
            if on_path[cur] {
                return cur;
            }
            match self.nodes[cur].parent {
                Some(p) => cur = p,
                None => return self.root,
            }
        }
    }

    /// Sum of branch lengths on the path between two nodes.
    pub fn patristic_distance(&self, a: usize, b: usize) -> f64 {
        let m = self.mrca(a, b);
        self.depths[a] + self.depths[b] - 2.0 * self.depths[m]
    }

    /// Time since two lineages diverged (half the patristic distance).
    pub fn divergence_time(&self, a: usize, b: usize) -> f64 {
        self.patristic_distance(a, b) / 2.0
    }

    /// Copy of the tree with branch lengths rescaled so the deepest tip sits at
    /// `height` above the root.
    pub fn scaled_to_root_height(&self, height: f64) -> Result<Self, FitError> {
        if !(height.is_finite() && height > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "root height must be finite and > 0, got {height}"
            )));
        }
        let current = self.root_height();
        if current <= 0.0 {
            return Err(FitError::InvalidInput(
                "cannot rescale a tree with zero root height".to_string(),
            ));
        }
        let factor = height / current;
        let mut scaled = self.clone();
        for node in &mut scaled.nodes {
            node.branch_length *= factor;
        }
        scaled.depths = compute_depths(&scaled.nodes, scaled.root);
        Ok(scaled)
    }

    /// Lineage records describing this tree (arena order).
    pub fn lineages(&self) -> Vec<Lineage> {
        self.nodes
            .iter()
            .map(|n| Lineage {
                id: n.id.clone(),
                parent: n.parent.map(|p| self.nodes[p].id.clone()),
                branch_length: n.branch_length,
            })
            .collect()
    }
}

fn compute_depths(nodes: &[TreeNode], root: usize) -> Vec<f64> {
    let mut depths = vec![0.0; nodes.len()];
    let mut stack = vec![root];
    while let Some(n) = stack.pop() {
        for &c in &nodes[n].children {
            depths[c] = depths[n] + nodes[c].branch_length;
            stack.push(c);
        }
    }
    depths
}
