//! Clade definitions and lineage-to-clade membership.
//!
//! Membership is always derived from tree topology plus a definition mapping.
//! Each lineage belongs to at most one clade: the finest one covering it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::tree::Tree;
use crate::error::FitError;

/// A named clade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clade {
    pub name: String,
    /// Lineage used to attach clade-level observations (the clade root when
    /// the clade was defined by its root, else its first member).
    pub anchor: usize,
    /// Member lineages in arena order.
    pub members: Vec<usize>,
}

/// Clade definitions resolved against one tree.
#[derive(Debug, Clone)]
pub struct CladeMap {
    clades: Vec<Clade>,
    membership: Vec<Option<usize>>,
}

impl CladeMap {
    /// Define clades by their root lineages.
    ///
    /// Every lineage is assigned to its nearest ancestor (inclusive) that is a
    /// clade root, so nested definitions resolve to the finest clade.
    pub fn from_roots<S: AsRef<str>>(tree: &Tree, roots: &[(S, S)]) -> Result<Self, FitError> {
        if roots.is_empty() {
            return Err(FitError::InvalidInput("no clades defined".to_string()));
        }

        let mut root_of: HashMap<usize, usize> = HashMap::new();
        let mut anchors = Vec::with_capacity(roots.len());
        let mut names = Vec::with_capacity(roots.len());
        for (ci, (name, lineage)) in roots.iter().enumerate() {
            let name = name.as_ref();
            let lineage = lineage.as_ref();
            let node = tree.index_of(lineage).ok_or_else(|| {
                FitError::UnresolvedLineage(format!(
                    "clade '{name}' is rooted at unknown lineage '{lineage}'"
                ))
            })?;
            if root_of.insert(node, ci).is_some() {
                return Err(FitError::InvalidInput(format!(
                    "lineage '{lineage}' roots more than one clade"
                )));
            }
            check_unique_name(&names, name)?;
            names.push(name.to_string());
            anchors.push(node);
        }

        let mut membership = vec![None; tree.len()];
        // Pre-order walk carrying the innermost clade seen on the way down.
        let mut stack = vec![(tree.root(), None)];
        while let Some((node, inherited)) = stack.pop() {
            let here = root_of.get(&node).copied().or(inherited);
            membership[node] = here;
            for &c in &tree.node(node).children {
                stack.push((c, here));
            }
        }

        Ok(Self::assemble(names, anchors, membership))
    }

    /// Define clades from an explicit lineage -> clade name mapping.
    ///
    /// Clades are ordered by first appearance in `assignments`.
    pub fn from_assignments<S: AsRef<str>>(
        tree: &Tree,
        assignments: &[(S, S)],
    ) -> Result<Self, FitError> {
        if assignments.is_empty() {
            return Err(FitError::InvalidInput("no clade assignments".to_string()));
        }

        let mut names: Vec<String> = Vec::new();
        let mut anchors: Vec<usize> = Vec::new();
        let mut membership = vec![None; tree.len()];
        for (lineage, clade) in assignments {
            let lineage = lineage.as_ref();
            let clade = clade.as_ref();
            let node = tree.index_of(lineage).ok_or_else(|| {
                FitError::UnresolvedLineage(format!(
                    "lineage '{lineage}' (clade '{clade}') is not in the tree"
                ))
            })?;
            let ci = match names.iter().position(|n| n == clade) {
                Some(ci) => ci,
                None => {
                    names.push(clade.to_string());
                    anchors.push(node);
                    names.len() - 1
                }
            };
            match membership[node] {
                Some(existing) if existing != ci => {
                    return Err(FitError::InvalidInput(format!(
                        "lineage '{lineage}' assigned to both '{}' and '{clade}'",
                        names[existing]
                    )));
                }
                _ => membership[node] = Some(ci),
            }
        }

        Ok(Self::assemble(names, anchors, membership))
    }

    /// Split the tree into exactly `n` clades by repeatedly replacing the
    /// clade with the most tips by its children. Ties go to the earliest
    /// clade. A clade whose children would overshoot `n` is never split, so
    /// polytomies can make some counts unreachable.
    pub fn partition(tree: &Tree, n: usize) -> Result<Self, FitError> {
        if n == 0 {
            return Err(FitError::InvalidInput("clade count must be > 0".to_string()));
        }
        let mut roots = vec![tree.root()];
        while roots.len() < n {
            let room = n - roots.len();
            let mut pick = 0;
            let mut pick_tips = 0;
            for (i, &r) in roots.iter().enumerate() {
                let children = tree.node(r).children.len();
                if children == 0 || children - 1 > room {
                    continue;
                }
                let tips = tree.tips_under(r).len();
                if tips > pick_tips {
                    pick = i;
                    pick_tips = tips;
                }
            }
            if pick_tips == 0 {
                return Err(FitError::InvalidInput(format!(
                    "tree cannot be split into exactly {n} clades (stuck at {})",
                    roots.len()
                )));
            }
            let node = roots.remove(pick);
            for (offset, &child) in tree.node(node).children.iter().enumerate() {
                roots.insert(pick + offset, child);
            }
        }

        let defs: Vec<(String, String)> = roots
            .iter()
            .enumerate()
            .map(|(i, &r)| (format!("clade{i}"), tree.node(r).id.clone()))
            .collect();
        Self::from_roots(tree, &defs)
    }

    fn assemble(names: Vec<String>, anchors: Vec<usize>, membership: Vec<Option<usize>>) -> Self {
        let mut clades: Vec<Clade> = names
            .into_iter()
            .zip(anchors)
            .map(|(name, anchor)| Clade {
                name,
                anchor,
                members: Vec::new(),
            })
            .collect();
        for (node, m) in membership.iter().enumerate() {
            if let Some(ci) = m {
                clades[*ci].members.push(node);
            }
        }
        Self { clades, membership }
    }

    pub fn clades(&self) -> &[Clade] {
        &self.clades
    }

    pub fn len(&self) -> usize {
        self.clades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clades.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.clades.iter().map(|c| c.name.clone()).collect()
    }

    /// Clade index of a lineage, if it belongs to one.
    pub fn clade_of(&self, node: usize) -> Option<usize> {
        self.membership.get(node).copied().flatten()
    }

    /// Tips that belong to clade `ci`.
    pub fn member_tips(&self, tree: &Tree, ci: usize) -> Vec<usize> {
        self.clades[ci]
            .members
            .iter()
            .copied()
            .filter(|&n| tree.is_tip(n))
            .collect()
    }
}

fn check_unique_name(names: &[String], name: &str) -> Result<(), FitError> {
    if names.iter().any(|n| n == name) {
        return Err(FitError::InvalidInput(format!("duplicate clade name '{name}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::Lineage;

    // (((A,B)X,C)W,(D,E)Y)R
    fn tree() -> Tree {
        Tree::new(vec![
            Lineage::new("R", None, 0.0),
            Lineage::new("W", Some("R"), 1.0),
            Lineage::new("Y", Some("R"), 1.0),
            Lineage::new("X", Some("W"), 1.0),
            Lineage::new("C", Some("W"), 2.0),
            Lineage::new("A", Some("X"), 1.0),
            Lineage::new("B", Some("X"), 1.0),
            Lineage::new("D", Some("Y"), 2.0),
            Lineage::new("E", Some("Y"), 2.0),
        ])
        .unwrap()
    }

    fn tip_names(tree: &Tree, map: &CladeMap, ci: usize) -> Vec<String> {
        map.member_tips(tree, ci)
            .into_iter()
            .map(|i| tree.node(i).id.clone())
            .collect()
    }

    #[test]
    fn nested_roots_resolve_to_finest_clade() {
        let tree = tree();
        let map = CladeMap::from_roots(&tree, &[("outer", "W"), ("inner", "X"), ("right", "Y")])
            .unwrap();
        assert_eq!(tip_names(&tree, &map, 0), vec!["C"]);
        assert_eq!(tip_names(&tree, &map, 1), vec!["A", "B"]);
        assert_eq!(tip_names(&tree, &map, 2), vec!["D", "E"]);
        assert_eq!(map.clade_of(tree.root()), None);
    }

    #[test]
    fn unknown_root_is_unresolved() {
        let tree = tree();
        let err = CladeMap::from_roots(&tree, &[("a", "nope")]).unwrap_err();
        assert!(matches!(err, FitError::UnresolvedLineage(_)));
    }

    #[test]
    fn assignments_keep_first_appearance_order() {
        let tree = tree();
        let map = CladeMap::from_assignments(
            &tree,
            &[("D", "south"), ("A", "north"), ("E", "south"), ("B", "north")],
        )
        .unwrap();
        assert_eq!(map.names(), vec!["south", "north"]);
        assert_eq!(tip_names(&tree, &map, 0), vec!["D", "E"]);
        assert_eq!(map.clades()[0].anchor, tree.index_of("D").unwrap());
    }

    #[test]
    fn partition_splits_largest_clade_first() {
        let tree = tree();
        let map = CladeMap::partition(&tree, 3).unwrap();
        assert_eq!(map.len(), 3);
        // R splits into W (3 tips) and Y (2 tips); W splits next.
        assert_eq!(tip_names(&tree, &map, 0), vec!["A", "B"]);
        assert_eq!(tip_names(&tree, &map, 1), vec!["C"]);
        assert_eq!(tip_names(&tree, &map, 2), vec!["D", "E"]);
    }

    // (A,B,C,(D,E)Z)R
    fn polytomy() -> Tree {
        Tree::new(vec![
            Lineage::new("R", None, 0.0),
            Lineage::new("A", Some("R"), 1.0),
            Lineage::new("B", Some("R"), 1.0),
            Lineage::new("C", Some("R"), 1.0),
            Lineage::new("Z", Some("R"), 0.5),
            Lineage::new("D", Some("Z"), 0.5),
            Lineage::new("E", Some("Z"), 0.5),
        ])
        .unwrap()
    }

    #[test]
    fn partition_never_overshoots_at_polytomies() {
        let tree = polytomy();
        for n in [2, 3] {
            let err = CladeMap::partition(&tree, n).unwrap_err();
            assert!(matches!(err, FitError::InvalidInput(_)), "n={n}");
        }
        let map = CladeMap::partition(&tree, 4).unwrap();
        assert_eq!(map.len(), 4);
        let map = CladeMap::partition(&tree, 5).unwrap();
        assert_eq!(map.len(), 5);
        assert_eq!(tip_names(&tree, &map, 3), vec!["D"]);
        assert_eq!(tip_names(&tree, &map, 4), vec!["E"]);
        assert!(CladeMap::partition(&tree, 6).is_err());
    }

    #[test]
    fn partition_rejects_too_many_clades() {
        let tree = tree();
        assert!(CladeMap::partition(&tree, 9).is_err());
    }
}
