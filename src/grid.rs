//! Hyperparameter grids and their Cartesian expansion.
//!
//! A grid maps parameter names to candidate value lists; expansion produces
//! one concrete assignment per element of the full Cartesian product.
//! Definition order is preserved end to end so expansion order, result
//! tables, and logs are reproducible run to run.

use itertools::Itertools;
use serde::Deserialize;
use serde::de::{MapAccess, Visitor};
use std::fmt;

/// A single hyperparameter value as it appears in a grid or assignment.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Int(v) => v as f64,
            ParamValue::Float(v) => v,
        }
    }

    /// Integer view of the value. Floats are rejected so a grid cannot
    /// silently truncate `0.5` into `0`.
    pub fn as_usize(self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if v >= 0 => Some(v as usize),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            // Keep whole-number floats recognizable as floats (1.0, not 1).
            ParamValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            ParamValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// An ordered mapping of parameter name to candidate values.
#[derive(Debug, Clone, Default)]
pub struct ParamGrid {
    entries: Vec<(String, Vec<ParamValue>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(String, Vec<ParamValue>)>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, name: impl Into<String>, values: Vec<ParamValue>) {
        self.entries.push((name.into(), values));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Vec<ParamValue>)] {
        &self.entries
    }

    /// Expands the grid into the full Cartesian product of assignments.
    ///
    /// Parameters iterate in definition order with the last parameter varying
    /// fastest. An empty grid yields exactly one empty assignment, meaning
    /// "use the model family's defaults". A parameter with an empty candidate
    /// list yields no assignments at all; configuration validation rejects
    /// that case before it reaches here.
    pub fn expand(&self) -> Vec<ParamAssignment> {
        if self.entries.is_empty() {
            return vec![ParamAssignment::default()];
        }
        self.entries
            .iter()
            .map(|(name, values)| {
                values
                    .iter()
                    .map(|value| (name.clone(), *value))
                    .collect::<Vec<_>>()
            })
            .multi_cartesian_product()
            .map(|entries| ParamAssignment { entries })
            .collect()
    }
}

// Deserialized through an explicit map visitor so TOML document order is
// kept; deriving via a map type would leave ordering to the map.
impl<'de> Deserialize<'de> for ParamGrid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct GridVisitor;

        impl<'de> Visitor<'de> for GridVisitor {
            type Value = ParamGrid;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of parameter name to candidate value list")
            }

            fn visit_map<A>(self, mut map: A) -> Result<ParamGrid, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((name, values)) = map.next_entry::<String, Vec<ParamValue>>()? {
                    entries.push((name, values));
                }
                Ok(ParamGrid { entries })
            }
        }

        deserializer.deserialize_map(GridVisitor)
    }
}

/// One concrete point of a grid: every parameter bound to a single value.
///
/// Constructed per grid-search iteration and discarded after evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamAssignment {
    entries: Vec<(String, ParamValue)>,
}

impl ParamAssignment {
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ParamValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl fmt::Display for ParamAssignment {
    /// Stable `name=value, name=value` form carried into result tables.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("default");
        }
        let mut first = true;
        for (name, value) in &self.entries {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_values(values: &[i64]) -> Vec<ParamValue> {
        values.iter().map(|&v| ParamValue::Int(v)).collect()
    }

    #[test]
    fn expands_cartesian_product_in_definition_order() {
        let mut grid = ParamGrid::new();
        grid.push("a", int_values(&[1, 2]));
        grid.push("b", int_values(&[10]));

        let assignments = grid.expand();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].get("a"), Some(ParamValue::Int(1)));
        assert_eq!(assignments[0].get("b"), Some(ParamValue::Int(10)));
        assert_eq!(assignments[1].get("a"), Some(ParamValue::Int(2)));
        assert_eq!(assignments[1].get("b"), Some(ParamValue::Int(10)));
    }

    #[test]
    fn empty_grid_yields_single_default_assignment() {
        let grid = ParamGrid::new();
        let assignments = grid.expand();
        assert_eq!(assignments.len(), 1);
        assert!(assignments[0].is_empty());
        assert_eq!(assignments[0].to_string(), "default");
    }

    #[test]
    fn last_parameter_varies_fastest() {
        let mut grid = ParamGrid::new();
        grid.push("leaf", int_values(&[5, 15]));
        grid.push("split", int_values(&[5, 10]));

        let assignments = grid.expand();
        assert_eq!(assignments.len(), 4);
        let rendered: Vec<String> = assignments.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "leaf=5, split=5",
                "leaf=5, split=10",
                "leaf=15, split=5",
                "leaf=15, split=10",
            ]
        );
    }

    #[test]
    fn display_keeps_whole_floats_distinguishable() {
        let mut grid = ParamGrid::new();
        grid.push(
            "l1_ratio",
            vec![ParamValue::Float(0.5), ParamValue::Float(1.0)],
        );
        let rendered: Vec<String> = grid.expand().iter().map(|a| a.to_string()).collect();
        assert_eq!(rendered, vec!["l1_ratio=0.5", "l1_ratio=1.0"]);
    }

    #[test]
    fn integer_view_rejects_floats_and_negatives() {
        assert_eq!(ParamValue::Int(7).as_usize(), Some(7));
        assert_eq!(ParamValue::Int(-1).as_usize(), None);
        assert_eq!(ParamValue::Float(2.0).as_usize(), None);
        assert_eq!(ParamValue::Float(0.5).as_f64(), 0.5);
        assert_eq!(ParamValue::Int(3).as_f64(), 3.0);
    }

    #[test]
    fn toml_grid_preserves_document_order() {
        let grid: ParamGrid = toml::from_str(
            "min_samples_leaf = [5, 15]\nmin_samples_split = [5, 10]\nl1_ratio = [0.2]\n",
        )
        .expect("grid should parse");
        let names: Vec<&str> = grid.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["min_samples_leaf", "min_samples_split", "l1_ratio"]);
        assert_eq!(grid.entries()[2].1, vec![ParamValue::Float(0.2)]);
    }
}
