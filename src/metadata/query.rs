//! Stratified fold query
//!
//! Every class in the label subset is ranked by a per-class ordering, capped at
//! `max_per_class` rows, and dealt round-robin into `num_folds` buckets:
//! `bucket = (rank - 1) % num_folds`. The test side of fold `k` is bucket `k`,
//! the train side is every other bucket.

use serde::{Deserialize, Serialize};

use super::Split;
use crate::utils::error::{Result, SceneError};

/// Name of the SQL scalar function used for seeded ordering
pub const FOLD_KEY_FUNCTION: &str = "fold_key";

/// How rows are ordered inside a class before bucketing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FoldOrdering {
    /// Keyed hash of `(seed, id)`: identical splits on every call
    Seeded { seed: u64 },
    /// SQLite `random()`: a new split on every call
    Unseeded,
}

impl Default for FoldOrdering {
    fn default() -> Self {
        FoldOrdering::Seeded { seed: 42 }
    }
}

/// FNV-1a over the seed bytes followed by the id text
pub fn fold_key(seed: u64, id: &str) -> i64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for byte in seed.to_le_bytes().iter().chain(id.as_bytes()) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash as i64
}

/// Reject anything but `[A-Za-z_][A-Za-z0-9_]*`; the table name is spliced into SQL
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SceneError::Config(format!("invalid table name '{}'", name)))
    }
}

/// Parameters of the fold query
#[derive(Debug, Clone)]
pub struct FoldQuery {
    table: String,
    labels: Vec<i64>,
    max_per_class: usize,
    num_folds: usize,
    ordering: FoldOrdering,
}

impl FoldQuery {
    pub fn new(
        table: impl Into<String>,
        labels: Vec<i64>,
        max_per_class: usize,
        num_folds: usize,
    ) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        if labels.is_empty() {
            return Err(SceneError::Config("fold query needs at least one label".into()));
        }
        if num_folds == 0 {
            return Err(SceneError::Config("num_folds must be > 0".into()));
        }
        Ok(Self {
            table,
            labels,
            max_per_class,
            num_folds,
            ordering: FoldOrdering::default(),
        })
    }

    pub fn with_ordering(mut self, ordering: FoldOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    pub fn max_per_class(&self) -> usize {
        self.max_per_class
    }

    pub fn ordering(&self) -> FoldOrdering {
        self.ordering
    }

    /// SQL text selecting `id, image_path, class_label, bucket`
    ///
    /// With a split, rows are restricted to that side of `:fold`; without one,
    /// every capped row is returned with its bucket. Bound parameters are
    /// `:max_per_class`, `:num_folds`, `:fold` (split only) and `:seed` (seeded only).
    pub fn sql(&self, split: Option<Split>) -> String {
        let order_key = match self.ordering {
            FoldOrdering::Seeded { .. } => format!("{}(:seed, id), id", FOLD_KEY_FUNCTION),
            FoldOrdering::Unseeded => "random()".to_string(),
        };
        let labels = self
            .labels
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let split_filter = match split {
            Some(Split::Test) => " AND bucket = :fold",
            Some(Split::Train) => " AND bucket <> :fold",
            None => "",
        };

        format!(
            "WITH ranked AS (\
               SELECT id, image_path, class_label, \
                 row_number() OVER (PARTITION BY class_label ORDER BY {order_key}) AS bucket_rank \
               FROM {table} \
               WHERE class_label IN ({labels})\
             ), \
             bucketed AS (\
               SELECT id, image_path, class_label, bucket_rank, \
                 (bucket_rank - 1) % :num_folds AS bucket \
               FROM ranked \
               WHERE bucket_rank <= :max_per_class\
             ) \
             SELECT id, image_path, class_label, bucket \
             FROM bucketed \
             WHERE 1 = 1{split_filter} \
             ORDER BY class_label, bucket_rank",
            order_key = order_key,
            table = self.table,
            labels = labels,
            split_filter = split_filter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> FoldQuery {
        FoldQuery::new("images", vec![3, 8, 33], 200, 5).unwrap()
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("images").is_ok());
        assert!(validate_identifier("_scenes_v2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2images").is_err());
        assert!(validate_identifier("images;--").is_err());
    }

    #[test]
    fn test_fold_key_is_stable_and_seed_dependent() {
        assert_eq!(fold_key(42, "17"), fold_key(42, "17"));
        assert_ne!(fold_key(42, "17"), fold_key(43, "17"));
        assert_ne!(fold_key(42, "17"), fold_key(42, "18"));
    }

    #[test]
    fn test_seeded_sql_uses_fold_key() {
        let sql = query().sql(Some(Split::Test));
        assert!(sql.contains("fold_key(:seed, id)"));
        assert!(sql.contains("class_label IN (3, 8, 33)"));
        assert!(sql.contains("bucket = :fold"));
        assert!(!sql.contains("random()"));
    }

    #[test]
    fn test_unseeded_sql_uses_random() {
        let sql = query()
            .with_ordering(FoldOrdering::Unseeded)
            .sql(Some(Split::Train));
        assert!(sql.contains("random()"));
        assert!(!sql.contains(":seed"));
        assert!(sql.contains("bucket <> :fold"));
    }

    #[test]
    fn test_unfiltered_sql_has_no_fold_parameter() {
        let sql = query().sql(None);
        assert!(!sql.contains(":fold"));
    }

    #[test]
    fn test_new_rejects_bad_table() {
        assert!(FoldQuery::new("images where 1", vec![3], 10, 5).is_err());
        assert!(FoldQuery::new("images", vec![], 10, 5).is_err());
    }
}
