//! Cross observations, validated and indexed by clade.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::domain::clades::CladeMap;
use crate::domain::tree::Tree;
use crate::error::FitError;

/// One observed cross: a lineage pair (or a single lineage) with an
/// independent value `x` (e.g. divergence time) and a dependent value `y`
/// (e.g. trait distance or isolation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossObservation {
    pub lineage_a: String,
    pub lineage_b: Option<String>,
    pub x: f64,
    pub y: f64,
    /// Relative weight in the objective (defaults to 1).
    pub weight: Option<f64>,
}

impl CrossObservation {
    pub fn pair(a: impl Into<String>, b: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            lineage_a: a.into(),
            lineage_b: Some(b.into()),
            x,
            y,
            weight: None,
        }
    }

    pub fn single(a: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            lineage_a: a.into(),
            lineage_b: None,
            x,
            y,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Columnar view of one clade's observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CladeData {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub w: Vec<f64>,
}

impl CladeData {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Summary stats about an observation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub n_points: usize,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub clade_sizes: Vec<usize>,
}

/// Validated observations, grouped by clade in clade-definition order.
#[derive(Debug, Clone)]
pub struct ObservationSet {
    records: Vec<CrossObservation>,
    /// Clade index of each record.
    assigned: Vec<usize>,
    clades: Vec<CladeData>,
    fingerprint: u64,
}

impl ObservationSet {
    /// Validate and index `records`.
    ///
    /// Every referenced lineage must exist in `tree` and belong to a clade in
    /// `clades`. A cross is assigned to the clade of its first lineage.
    pub fn new(
        records: Vec<CrossObservation>,
        tree: &Tree,
        clades: &CladeMap,
    ) -> Result<Self, FitError> {
        let mut grouped: Vec<CladeData> = clades
            .clades()
            .iter()
            .map(|c| CladeData {
                name: c.name.clone(),
                ..CladeData::default()
            })
            .collect();
        let mut assigned = Vec::with_capacity(records.len());

        for (row, rec) in records.iter().enumerate() {
            if !rec.x.is_finite() || !rec.y.is_finite() {
                return Err(FitError::InvalidInput(format!(
                    "observation {row} has non-finite values (x={}, y={})",
                    rec.x, rec.y
                )));
            }
            let weight = rec.weight.unwrap_or(1.0);
            if !(weight.is_finite() && weight > 0.0) {
                return Err(FitError::InvalidInput(format!(
                    "observation {row} has invalid weight {weight}"
                )));
            }

            let ci = resolve_clade(tree, clades, &rec.lineage_a)?;
            if let Some(b) = &rec.lineage_b {
                resolve_clade(tree, clades, b)?;
            }

            assigned.push(ci);
            let data = &mut grouped[ci];
            data.x.push(rec.x);
            data.y.push(rec.y);
            data.w.push(weight);
        }

        let fingerprint = fingerprint_of(&records, &assigned, &grouped);
        Ok(Self {
            records,
            assigned,
            clades: grouped,
            fingerprint,
        })
    }

    pub fn records(&self) -> &[CrossObservation] {
        &self.records
    }

    /// Clade index each record was assigned to (same order as `records`).
    pub fn assignments(&self) -> &[usize] {
        &self.assigned
    }

    pub fn clades(&self) -> &[CladeData] {
        &self.clades
    }

    pub fn clade_names(&self) -> Vec<String> {
        self.clades.iter().map(|c| c.name.clone()).collect()
    }

    pub fn clade_sizes(&self) -> Vec<usize> {
        self.clades.iter().map(CladeData::len).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deterministic identity of the record contents and their clade grouping.
    ///
    /// Fit scores are only comparable between results that share it.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn stats(&self) -> Option<DatasetStats> {
        if self.records.is_empty() {
            return None;
        }
        let mut x_min = f64::INFINITY;
        let mut x_max = f64::NEG_INFINITY;
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        for r in &self.records {
            x_min = x_min.min(r.x);
            x_max = x_max.max(r.x);
            y_min = y_min.min(r.y);
            y_max = y_max.max(r.y);
        }
        Some(DatasetStats {
            n_points: self.records.len(),
            x_min,
            x_max,
            y_min,
            y_max,
            clade_sizes: self.clade_sizes(),
        })
    }
}

fn resolve_clade(tree: &Tree, clades: &CladeMap, lineage: &str) -> Result<usize, FitError> {
    let node = tree
        .index_of(lineage)
        .ok_or_else(|| FitError::UnresolvedLineage(format!("'{lineage}' is not in the tree")))?;
    clades.clade_of(node).ok_or_else(|| {
        FitError::UnresolvedLineage(format!("'{lineage}' is not assigned to any clade"))
    })
}

fn fingerprint_of(records: &[CrossObservation], assigned: &[usize], clades: &[CladeData]) -> u64 {
    let mut hasher = DefaultHasher::new();
    clades.len().hash(&mut hasher);
    for c in clades {
        c.name.hash(&mut hasher);
    }
    records.len().hash(&mut hasher);
    for (r, ci) in records.iter().zip(assigned) {
        ci.hash(&mut hasher);
        r.lineage_a.hash(&mut hasher);
        r.lineage_b.hash(&mut hasher);
        r.x.to_bits().hash(&mut hasher);
        r.y.to_bits().hash(&mut hasher);
        r.weight.map(f64::to_bits).hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::Lineage;

    fn setup() -> (Tree, CladeMap) {
        let tree = Tree::new(vec![
            Lineage::new("R", None, 0.0),
            Lineage::new("X", Some("R"), 1.0),
            Lineage::new("Y", Some("R"), 1.0),
            Lineage::new("A", Some("X"), 1.0),
            Lineage::new("B", Some("X"), 1.0),
            Lineage::new("C", Some("Y"), 1.0),
            Lineage::new("D", Some("Y"), 1.0),
        ])
        .unwrap();
        let clades = CladeMap::from_roots(&tree, &[("x", "X"), ("y", "Y")]).unwrap();
        (tree, clades)
    }

    #[test]
    fn groups_records_by_first_lineage_clade() {
        let (tree, clades) = setup();
        let obs = ObservationSet::new(
            vec![
                CrossObservation::pair("A", "B", 1.0, 0.2),
                CrossObservation::pair("C", "D", 1.0, 0.4),
                CrossObservation::pair("A", "C", 2.0, 0.9).with_weight(2.0),
            ],
            &tree,
            &clades,
        )
        .unwrap();
        assert_eq!(obs.clade_sizes(), vec![2, 1]);
        assert_eq!(obs.clades()[0].w, vec![1.0, 2.0]);
        assert_eq!(obs.assignments(), &[0, 1, 0]);
    }

    #[test]
    fn unknown_or_unassigned_lineage_is_unresolved() {
        let (tree, clades) = setup();
        let err = ObservationSet::new(vec![CrossObservation::single("Z", 1.0, 0.0)], &tree, &clades)
            .unwrap_err();
        assert!(matches!(err, FitError::UnresolvedLineage(_)));

        let err = ObservationSet::new(
            vec![CrossObservation::pair("A", "R", 1.0, 0.0)],
            &tree,
            &clades,
        )
        .unwrap_err();
        assert!(matches!(err, FitError::UnresolvedLineage(_)));
    }

    #[test]
    fn rejects_non_finite_values_and_bad_weights() {
        let (tree, clades) = setup();
        let err = ObservationSet::new(
            vec![CrossObservation::single("A", f64::INFINITY, 0.0)],
            &tree,
            &clades,
        )
        .unwrap_err();
        assert!(matches!(err, FitError::InvalidInput(_)));

        let err = ObservationSet::new(
            vec![CrossObservation::single("A", 1.0, 0.0).with_weight(0.0)],
            &tree,
            &clades,
        )
        .unwrap_err();
        assert!(matches!(err, FitError::InvalidInput(_)));
    }

    #[test]
    fn fingerprint_tracks_contents() {
        let (tree, clades) = setup();
        let a = ObservationSet::new(vec![CrossObservation::single("A", 1.0, 0.5)], &tree, &clades)
            .unwrap();
        let b = ObservationSet::new(vec![CrossObservation::single("A", 1.0, 0.5)], &tree, &clades)
            .unwrap();
        let c = ObservationSet::new(vec![CrossObservation::single("A", 1.0, 0.6)], &tree, &clades)
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_tracks_clade_grouping() {
        let (tree, two) = setup();
        let three = CladeMap::from_roots(&tree, &[("a", "A"), ("b", "B"), ("y", "Y")]).unwrap();
        let renamed = CladeMap::from_roots(&tree, &[("left", "X"), ("right", "Y")]).unwrap();
        let records = vec![
            CrossObservation::single("A", 1.0, 0.5),
            CrossObservation::single("B", 1.0, 0.7),
        ];
        let by_two = ObservationSet::new(records.clone(), &tree, &two).unwrap();
        let by_three = ObservationSet::new(records.clone(), &tree, &three).unwrap();
        let by_renamed = ObservationSet::new(records, &tree, &renamed).unwrap();
        assert_ne!(by_two.fingerprint(), by_three.fingerprint());
        assert_ne!(by_two.fingerprint(), by_renamed.fingerprint());
    }
}
