//! Built-in tabular dataset type.
//!
//! Stands in for the external tabular collaborator: a small columnar table
//! whose values come from the Pocket value universe. Ships with a default
//! identity hook (shape, column names, per-column digests, target column) so
//! value-equal datasets collapse to the same cache key while any column
//! mutation changes it, even when the shape is preserved.

use anyhow::{bail, Result};
use sha1::{Digest, Sha1};

use crate::error::PocketError;
use crate::ident::Identifier;
use crate::identity::id_of;
use crate::keying::canonical_string;
use crate::value::Value;

/// Registry tag datasets are identified and serialised under.
pub const DATASET_TAG: &str = "pocket/dataset";

/// A named column of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name, unique within a dataset.
    pub name: String,
    /// Cell values, one per row.
    pub values: Vec<Value>,
}

/// A columnar table with an optional inference-affecting target column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    target: Option<String>,
}

impl Dataset {
    /// Build a dataset from columns of equal length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
                bail!(
                    "ragged dataset: column `{}` has {} rows, expected {}",
                    bad.name,
                    bad.values.len(),
                    rows
                );
            }
        }
        Ok(Self { columns, target: None })
    }

    /// (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        let rows = self.columns.first().map(|c| c.values.len()).unwrap_or(0);
        (rows, self.columns.len())
    }

    /// All columns in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The designated target column, if any. Part of the dataset identity:
    /// retargeting a dataset changes its cache key.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Designate the inference-affecting target column.
    pub fn set_target(&mut self, name: impl Into<String>) {
        self.target = Some(name.into());
    }

    /// Wrap the dataset as a tagged foreign value.
    pub fn into_value(self) -> Value {
        Value::foreign(DATASET_TAG, std::sync::Arc::new(self))
    }
}

/// Digest one column's cells through their canonical identifier strings.
fn column_digest(column: &Column) -> Result<String, PocketError> {
    let mut hasher = Sha1::new();
    for cell in &column.values {
        hasher.update(canonical_string(&id_of(cell)?).as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The default dataset identity body, registered under [`DATASET_TAG`].
pub(crate) fn dataset_identity(ds: &Dataset) -> Result<Identifier, PocketError> {
    let (rows, cols) = ds.shape();
    let names = ds
        .columns()
        .iter()
        .map(|c| Identifier::Str(c.name.clone()))
        .collect::<Vec<_>>();
    let hashes = ds
        .columns()
        .iter()
        .map(|c| Ok(Identifier::Str(column_digest(c)?)))
        .collect::<Result<Vec<_>, PocketError>>()?;
    let target = match ds.target() {
        Some(name) => Identifier::Str(name.to_string()),
        None => Identifier::Nil,
    };
    Ok(Identifier::entries(vec![
        (
            Identifier::Keyword(":shape".into()),
            Identifier::Seq(vec![Identifier::Int(rows as i64), Identifier::Int(cols as i64)]),
        ),
        (Identifier::Keyword(":column-names".into()), Identifier::Seq(names)),
        (Identifier::Keyword(":column-hashes".into()), Identifier::Seq(hashes)),
        (Identifier::Keyword(":target".into()), target),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::from_columns(vec![
            Column { name: "x".into(), values: vec![Value::Int(1), Value::Int(2)] },
            Column { name: "y".into(), values: vec![Value::Float(0.5), Value::Float(1.5)] },
        ])
        .unwrap()
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let err = Dataset::from_columns(vec![
            Column { name: "x".into(), values: vec![Value::Int(1)] },
            Column { name: "y".into(), values: vec![] },
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn identity_is_stable_for_equal_datasets() {
        assert_eq!(
            dataset_identity(&sample()).unwrap(),
            dataset_identity(&sample()).unwrap()
        );
    }

    #[test]
    fn mutating_a_column_changes_identity_with_shape_preserved() {
        let base = sample();
        let mut derived = base.clone();
        derived.columns[0].values[1] = Value::Int(3);
        assert_eq!(base.shape(), derived.shape());
        assert_ne!(
            dataset_identity(&base).unwrap(),
            dataset_identity(&derived).unwrap()
        );
    }

    #[test]
    fn retargeting_changes_identity() {
        let base = sample();
        let mut targeted = base.clone();
        targeted.set_target("y");
        assert_ne!(
            dataset_identity(&base).unwrap(),
            dataset_identity(&targeted).unwrap()
        );
    }
}
