//! # Data Loading and Validation Module
//!
//! This module is the exclusive entry point for user-provided data. It reads
//! tabular CSV files, validates them, and transforms them into the clean
//! `ndarray` structures required by the fitting strategies.
//!
//! - User-Centric Errors: failures are assumed to be user-input errors. The
//!   `DataError` enum is designed to provide clear, actionable feedback.
//! - Strict Validation: shapes must agree, all values must be finite, and the
//!   partition must assign every attribute to exactly one group. Nothing is
//!   fitted against partially-validated inputs.

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("the required column '{0}' was not found in the input file")]
    ColumnNotFound(String),

    #[error("input '{name}' contains no {unit}")]
    EmptyInput { name: &'static str, unit: &'static str },

    #[error("non-finite value (NaN or infinity) in '{name}' at position {index}")]
    NonFinite { name: &'static str, index: usize },

    #[error(
        "shape mismatch: {left_name} has {left} {unit}, but {right_name} has {right}"
    )]
    DimensionMismatch {
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
        unit: &'static str,
    },

    #[error(
        "row {row} of the partition matrix has {set_bits} set entries; every attribute must belong to exactly one group"
    )]
    InvalidPartition { row: usize, set_bits: usize },

    #[error("partition assigns attribute {attribute} to group {group}, but only {groups} groups exist")]
    GroupOutOfRange {
        attribute: usize,
        group: usize,
        groups: usize,
    },

    #[error("partition has {groups} groups for only {attributes} attributes")]
    MoreGroupsThanAttributes { groups: usize, attributes: usize },

    #[error("value '{value}' in column '{column}' at row {row} is not numeric")]
    NonNumericValue {
        value: String,
        column: String,
        row: usize,
    },
}

/// A validated regression problem: the design matrix and its response vector.
#[derive(Debug, Clone)]
pub struct ProblemData {
    x: Array2<f64>,
    y: Array1<f64>,
}

impl ProblemData {
    /// Validates shapes and finiteness and wraps the arrays.
    pub fn new(x: Array2<f64>, y: Array1<f64>) -> Result<Self, DataError> {
        if x.nrows() == 0 {
            return Err(DataError::EmptyInput {
                name: "design matrix",
                unit: "examples",
            });
        }
        if x.ncols() == 0 {
            return Err(DataError::EmptyInput {
                name: "design matrix",
                unit: "attributes",
            });
        }
        if x.nrows() != y.len() {
            return Err(DataError::DimensionMismatch {
                left_name: "design matrix",
                left: x.nrows(),
                right_name: "response vector",
                right: y.len(),
                unit: "examples",
            });
        }
        if let Some(index) = x.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFinite {
                name: "design matrix",
                index,
            });
        }
        if let Some(index) = y.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFinite {
                name: "response vector",
                index,
            });
        }
        Ok(Self { x, y })
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn num_examples(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_attributes(&self) -> usize {
        self.x.ncols()
    }
}

/// A fixed assignment of attributes to disjoint groups.
///
/// Constructed either from an M-by-K 0/1 indicator matrix (each row exactly one
/// set bit) or from a per-attribute group-index vector. The partition is shared
/// by reference across the fitting strategies and copied unchanged into every
/// returned model. Groups may be empty; an empty group always receives a zero
/// scale coefficient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    assignments: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl Partition {
    /// Builds a partition from an M-by-K indicator matrix.
    pub fn from_indicator(indicator: ArrayView2<f64>) -> Result<Self, DataError> {
        let groups = indicator.ncols();
        let mut assignments = Vec::with_capacity(indicator.nrows());
        for (row, attribute_row) in indicator.rows().into_iter().enumerate() {
            let mut set_bits = 0usize;
            let mut group = 0usize;
            for (k, &v) in attribute_row.iter().enumerate() {
                if v == 1.0 {
                    set_bits += 1;
                    group = k;
                } else if v != 0.0 {
                    return Err(DataError::InvalidPartition { row, set_bits: 0 });
                }
            }
            if set_bits != 1 {
                return Err(DataError::InvalidPartition { row, set_bits });
            }
            assignments.push(group);
        }
        Self::from_assignments(assignments, groups)
    }

    /// Builds a partition from a per-attribute group index vector.
    pub fn from_assignments(assignments: Vec<usize>, groups: usize) -> Result<Self, DataError> {
        if assignments.is_empty() {
            return Err(DataError::EmptyInput {
                name: "partition",
                unit: "attributes",
            });
        }
        if groups > assignments.len() {
            return Err(DataError::MoreGroupsThanAttributes {
                groups,
                attributes: assignments.len(),
            });
        }
        let mut members = vec![Vec::new(); groups];
        for (attribute, &group) in assignments.iter().enumerate() {
            if group >= groups {
                return Err(DataError::GroupOutOfRange {
                    attribute,
                    group,
                    groups,
                });
            }
            members[group].push(attribute);
        }
        Ok(Self {
            assignments,
            members,
        })
    }

    pub fn num_attributes(&self) -> usize {
        self.assignments.len()
    }

    pub fn num_groups(&self) -> usize {
        self.members.len()
    }

    /// Group index of one attribute.
    pub fn group_of(&self, attribute: usize) -> usize {
        self.assignments[attribute]
    }

    /// Attributes belonging to one group, in ascending order.
    pub fn members(&self, group: usize) -> &[usize] {
        &self.members[group]
    }

    /// Reconstructs the M-by-K 0/1 indicator matrix.
    pub fn to_indicator(&self) -> Array2<f64> {
        let mut indicator = Array2::zeros((self.num_attributes(), self.num_groups()));
        for (attribute, &group) in self.assignments.iter().enumerate() {
            indicator[[attribute, group]] = 1.0;
        }
        indicator
    }
}

/// Checks that a problem and a partition describe the same attribute set.
pub fn check_compatible(data: &ProblemData, partition: &Partition) -> Result<(), DataError> {
    if data.num_attributes() != partition.num_attributes() {
        return Err(DataError::DimensionMismatch {
            left_name: "design matrix",
            left: data.num_attributes(),
            right_name: "partition",
            right: partition.num_attributes(),
            unit: "attributes",
        });
    }
    Ok(())
}

/// A design matrix loaded from CSV, with the column order preserved so that
/// prediction inputs can be checked against the training layout.
#[derive(Debug)]
pub struct TabularData {
    pub x: Array2<f64>,
    pub y: Option<Array1<f64>>,
    pub attribute_names: Vec<String>,
}

/// Loads a CSV file of numeric columns. When `response` names a column, that
/// column becomes `y` and every other column, in file order, an attribute.
pub fn load_tabular(path: &Path, response: Option<&str>) -> Result<TabularData, DataError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();

    let response_index = match response {
        Some(name) => Some(
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| DataError::ColumnNotFound(name.to_owned()))?,
        ),
        None => None,
    };

    let attribute_names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != response_index)
        .map(|(_, h)| h.clone())
        .collect();
    if attribute_names.is_empty() {
        return Err(DataError::EmptyInput {
            name: "design matrix",
            unit: "attributes",
        });
    }

    let mut rows: Vec<f64> = Vec::new();
    let mut y_values: Vec<f64> = Vec::new();
    let mut num_rows = 0usize;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        for (column, value) in record.iter().enumerate() {
            let parsed: f64 =
                value
                    .trim()
                    .parse()
                    .map_err(|_| DataError::NonNumericValue {
                        value: value.to_owned(),
                        column: headers.get(column).cloned().unwrap_or_default(),
                        row,
                    })?;
            if Some(column) == response_index {
                y_values.push(parsed);
            } else {
                rows.push(parsed);
            }
        }
        num_rows += 1;
    }
    if num_rows == 0 {
        return Err(DataError::EmptyInput {
            name: "design matrix",
            unit: "examples",
        });
    }

    let x = Array2::from_shape_vec((num_rows, attribute_names.len()), rows).map_err(|_| {
        DataError::DimensionMismatch {
            left_name: "CSV rows",
            left: num_rows,
            right_name: "CSV header",
            right: attribute_names.len(),
            unit: "columns",
        }
    })?;

    Ok(TabularData {
        x,
        y: response_index.map(|_| Array1::from_vec(y_values)),
        attribute_names,
    })
}

/// Loads a partition from a one-column CSV file named `group`, holding the
/// 0-based group index of each attribute in design-matrix column order.
pub fn load_partition(path: &Path, attributes: usize) -> Result<Partition, DataError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = headers
        .iter()
        .position(|h| h == "group")
        .ok_or_else(|| DataError::ColumnNotFound("group".to_owned()))?;

    let mut assignments = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let value = record.get(column).unwrap_or("");
        let group: usize = value
            .trim()
            .parse()
            .map_err(|_| DataError::NonNumericValue {
                value: value.to_owned(),
                column: "group".to_owned(),
                row,
            })?;
        assignments.push(group);
    }
    if assignments.len() != attributes {
        return Err(DataError::DimensionMismatch {
            left_name: "partition file",
            left: assignments.len(),
            right_name: "design matrix",
            right: attributes,
            unit: "attributes",
        });
    }
    let groups = assignments.iter().copied().max().map_or(0, |g| g + 1);
    Partition::from_assignments(assignments, groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn problem_data_rejects_shape_mismatch() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let y = array![1.0, 2.0, 3.0];
        match ProblemData::new(x, y) {
            Err(DataError::DimensionMismatch { left, right, .. }) => {
                assert_eq!(left, 2);
                assert_eq!(right, 3);
            }
            other => panic!("expected DimensionMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn problem_data_rejects_non_finite() {
        let x = array![[1.0, f64::NAN], [3.0, 4.0]];
        let y = array![1.0, 2.0];
        assert!(matches!(
            ProblemData::new(x, y),
            Err(DataError::NonFinite { .. })
        ));
    }

    #[test]
    fn partition_rejects_empty_row() {
        let indicator = array![[1.0, 0.0], [0.0, 0.0]];
        match Partition::from_indicator(indicator.view()) {
            Err(DataError::InvalidPartition { row, set_bits }) => {
                assert_eq!(row, 1);
                assert_eq!(set_bits, 0);
            }
            other => panic!("expected InvalidPartition, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn partition_rejects_double_assignment() {
        let indicator = array![[1.0, 1.0], [0.0, 1.0]];
        match Partition::from_indicator(indicator.view()) {
            Err(DataError::InvalidPartition { row, set_bits }) => {
                assert_eq!(row, 0);
                assert_eq!(set_bits, 2);
            }
            other => panic!("expected InvalidPartition, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn partition_round_trips_through_indicator() {
        let partition = Partition::from_assignments(vec![0, 1, 0, 1], 2).unwrap();
        let rebuilt = Partition::from_indicator(partition.to_indicator().view()).unwrap();
        assert_eq!(partition, rebuilt);
        assert_eq!(partition.members(0), &[0, 2]);
        assert_eq!(partition.members(1), &[1, 3]);
        assert_eq!(partition.group_of(2), 0);
    }

    #[test]
    fn partition_rejects_more_groups_than_attributes() {
        assert!(matches!(
            Partition::from_assignments(vec![0, 1], 3),
            Err(DataError::MoreGroupsThanAttributes { .. })
        ));
    }

    #[test]
    fn loads_design_and_partition_from_csv() {
        let mut data_file = NamedTempFile::new().unwrap();
        writeln!(data_file, "x1,x2,y").unwrap();
        writeln!(data_file, "1.0,2.0,3.0").unwrap();
        writeln!(data_file, "4.0,5.0,6.0").unwrap();
        data_file.flush().unwrap();

        let loaded = load_tabular(data_file.path(), Some("y")).unwrap();
        assert_eq!(loaded.attribute_names, vec!["x1", "x2"]);
        assert_eq!(loaded.x, array![[1.0, 2.0], [4.0, 5.0]]);
        assert_eq!(loaded.y.unwrap(), array![3.0, 6.0]);

        let mut partition_file = NamedTempFile::new().unwrap();
        writeln!(partition_file, "group").unwrap();
        writeln!(partition_file, "0").unwrap();
        writeln!(partition_file, "1").unwrap();
        partition_file.flush().unwrap();

        let partition = load_partition(partition_file.path(), 2).unwrap();
        assert_eq!(partition.num_groups(), 2);
        assert_eq!(partition.members(1), &[1]);
    }

    #[test]
    fn load_tabular_rejects_missing_response() {
        let mut data_file = NamedTempFile::new().unwrap();
        writeln!(data_file, "x1,x2").unwrap();
        writeln!(data_file, "1.0,2.0").unwrap();
        data_file.flush().unwrap();

        assert!(matches!(
            load_tabular(data_file.path(), Some("y")),
            Err(DataError::ColumnNotFound(name)) if name == "y"
        ));
    }
}
