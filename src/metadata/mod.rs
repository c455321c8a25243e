//! Fold metadata
//!
//! A metadata provider answers one question: which `(id, image_path, class_label)`
//! rows make up the train or test side of fold `k`. Two interchangeable
//! providers exist, a live query against a SQLite table ([`SqliteMetadataStore`])
//! and pre-exported CSV files ([`CsvMetadataProvider`]).

pub mod csv_export;
pub mod query;
pub mod store;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ExperimentConfig, MetadataSource};
use crate::utils::error::{Result, SceneError};

pub use csv_export::{export_folds, CsvMetadataProvider};
pub use query::{FoldOrdering, FoldQuery};
pub use store::SqliteMetadataStore;

/// Opaque sample identifier
///
/// Integer ids from the store are kept in their decimal rendering so that ids
/// survive a CSV export unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for SampleId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for SampleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One labelled image as described by the metadata store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub id: SampleId,
    /// Path relative to the dataset root
    pub image_path: PathBuf,
    /// Raw label as stored, see [`LabelMap`]
    pub class_label: i64,
}

impl SampleRecord {
    pub fn new(id: impl Into<SampleId>, image_path: impl Into<PathBuf>, class_label: i64) -> Self {
        Self {
            id: id.into(),
            image_path: image_path.into(),
            class_label,
        }
    }
}

/// Side of a fold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn is_test(self) -> bool {
        matches!(self, Split::Test)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl From<bool> for Split {
    /// `true` selects the held-out side
    fn from(is_test: bool) -> Self {
        if is_test {
            Split::Test
        } else {
            Split::Train
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Train and test records of one fold
#[derive(Debug, Clone)]
pub struct FoldPartition {
    pub fold: usize,
    pub train: Vec<SampleRecord>,
    pub test: Vec<SampleRecord>,
}

impl FoldPartition {
    /// Build a partition, rejecting any sample id present on both sides
    pub fn new(fold: usize, train: Vec<SampleRecord>, test: Vec<SampleRecord>) -> Result<Self> {
        let test_ids: HashSet<&SampleId> = test.iter().map(|r| &r.id).collect();
        if let Some(shared) = train.iter().find(|r| test_ids.contains(&r.id)) {
            return Err(SceneError::MetadataFormat(format!(
                "fold {}: sample '{}' appears in both train and test",
                fold, shared.id
            )));
        }
        Ok(Self { fold, train, test })
    }

    pub fn records(&self, split: Split) -> &[SampleRecord] {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.test.len()
    }

    /// Number of records per raw label on one side
    pub fn class_counts(&self, split: Split) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records(split) {
            *counts.entry(record.class_label).or_insert(0) += 1;
        }
        counts
    }
}

/// Ordered set of raw labels; position is the class index the model predicts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<i64>,
}

impl LabelMap {
    pub fn new(labels: Vec<i64>) -> Self {
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// Class index of a raw label
    pub fn index_of(&self, raw: i64) -> Result<usize> {
        self.labels.iter().position(|&l| l == raw).ok_or_else(|| {
            SceneError::MetadataFormat(format!(
                "class label {} is not one of the configured labels {:?}",
                raw, self.labels
            ))
        })
    }
}

/// Source of fold partitions
pub trait MetadataProvider {
    /// Number of folds the samples are bucketed into
    fn num_folds(&self) -> usize;

    /// Records of one side of a fold, ordered by class then rank
    fn partition(&self, fold: usize, split: Split) -> Result<Vec<SampleRecord>>;

    /// Both sides of a fold
    fn fold_partition(&self, fold: usize) -> Result<FoldPartition> {
        let train = self.partition(fold, Split::Train)?;
        let test = self.partition(fold, Split::Test)?;
        FoldPartition::new(fold, train, test)
    }
}

pub(crate) fn check_fold(fold: usize, num_folds: usize) -> Result<()> {
    if fold >= num_folds {
        return Err(SceneError::Config(format!(
            "fold {} out of range 0..{}",
            fold, num_folds
        )));
    }
    Ok(())
}

/// Provider for the metadata source named in the configuration
pub fn open_provider(config: &ExperimentConfig) -> Result<Box<dyn MetadataProvider>> {
    let num_folds = config.folds.num_folds;
    let provider: Box<dyn MetadataProvider> = match &config.metadata.source {
        MetadataSource::Sqlite { path, table } => {
            let query = FoldQuery::new(
                table.clone(),
                config.metadata.labels.clone(),
                config.metadata.max_per_class,
                num_folds,
            )?
            .with_ordering(config.metadata.ordering);
            Box::new(SqliteMetadataStore::new(path.clone(), query))
        }
        MetadataSource::Csv { dir } => Box::new(CsvMetadataProvider::new(dir.clone(), num_folds)),
    };
    Ok(provider)
}
