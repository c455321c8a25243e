//! CSV fold files
//!
//! A fold is stored as two files, `fold_<k>_train.csv` and `fold_<k>_test.csv`,
//! with the header `id,image_path,class_label`. Readers only require
//! `image_path` and `class_label`; without an `id` column the image path
//! doubles as the sample id.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{check_fold, MetadataProvider, SampleId, SampleRecord, Split};
use crate::utils::error::{Result, SceneError};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    id: Option<String>,
    image_path: PathBuf,
    class_label: i64,
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: &'a str,
    image_path: String,
    class_label: i64,
}

/// Path of the file holding one side of a fold
pub fn fold_file(dir: &Path, fold: usize, split: Split) -> PathBuf {
    dir.join(format!("fold_{}_{}.csv", fold, split.as_str()))
}

/// Read the records of one fold file
pub fn read_records(path: &Path) -> Result<Vec<SampleRecord>> {
    if !path.exists() {
        return Err(SceneError::MetadataFormat(format!(
            "fold file {} does not exist",
            path.display()
        )));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| {
            SceneError::MetadataFormat(format!("{} row {}: {}", path.display(), line + 1, e))
        })?;
        let id = match row.id.filter(|id| !id.is_empty()) {
            Some(id) => SampleId::new(id),
            None => SampleId::new(row.image_path.to_string_lossy().into_owned()),
        };
        records.push(SampleRecord {
            id,
            image_path: row.image_path,
            class_label: row.class_label,
        });
    }
    Ok(records)
}

/// Write records to a fold file, replacing any existing file
pub fn write_records(path: &Path, records: &[SampleRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(ExportRow {
            id: record.id.as_str(),
            image_path: record.image_path.to_string_lossy().into_owned(),
            class_label: record.class_label,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Export both sides of each fold from any provider into `dir`
///
/// Returns the written paths, train file first for every fold.
pub fn export_folds(
    provider: &dyn MetadataProvider,
    dir: &Path,
    folds: &[usize],
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(folds.len() * 2);

    for &fold in folds {
        let partition = provider.fold_partition(fold)?;
        for split in [Split::Train, Split::Test] {
            let path = fold_file(dir, fold, split);
            write_records(&path, partition.records(split))?;
            written.push(path);
        }
        info!(
            fold,
            train = partition.train.len(),
            test = partition.test.len(),
            "Exported fold to {}",
            dir.display()
        );
    }
    Ok(written)
}

/// Reads folds from a directory of exported CSV files
#[derive(Debug, Clone)]
pub struct CsvMetadataProvider {
    dir: PathBuf,
    num_folds: usize,
}

impl CsvMetadataProvider {
    pub fn new(dir: impl Into<PathBuf>, num_folds: usize) -> Self {
        Self {
            dir: dir.into(),
            num_folds,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MetadataProvider for CsvMetadataProvider {
    fn num_folds(&self) -> usize {
        self.num_folds
    }

    fn partition(&self, fold: usize, split: Split) -> Result<Vec<SampleRecord>> {
        check_fold(fold, self.num_folds)?;
        read_records(&fold_file(&self.dir, fold, split))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FoldPartition;
    use tempfile::TempDir;

    /// In-memory provider: sample `i` of each class is tested in fold `i % num_folds`
    struct FixedProvider {
        records: Vec<(SampleRecord, usize)>,
        num_folds: usize,
    }

    impl FixedProvider {
        fn new(num_folds: usize) -> Self {
            let mut records = Vec::new();
            for label in [3i64, 8] {
                for i in 0..6 {
                    let id = label * 100 + i as i64;
                    records.push((
                        SampleRecord::new(id, format!("class_{label}/{i}.jpg"), label),
                        i % num_folds,
                    ));
                }
            }
            Self { records, num_folds }
        }
    }

    impl MetadataProvider for FixedProvider {
        fn num_folds(&self) -> usize {
            self.num_folds
        }

        fn partition(&self, fold: usize, split: Split) -> Result<Vec<SampleRecord>> {
            Ok(self
                .records
                .iter()
                .filter(|(_, bucket)| (*bucket == fold) == split.is_test())
                .map(|(r, _)| r.clone())
                .collect())
        }
    }

    #[test]
    fn test_fold_file_names() {
        let dir = Path::new("exports");
        assert_eq!(fold_file(dir, 2, Split::Train), PathBuf::from("exports/fold_2_train.csv"));
        assert_eq!(fold_file(dir, 0, Split::Test), PathBuf::from("exports/fold_0_test.csv"));
    }

    #[test]
    fn test_export_then_read_matches_provider() {
        let dir = TempDir::new().unwrap();
        let provider = FixedProvider::new(3);

        let written = export_folds(&provider, dir.path(), &[0, 1, 2]).unwrap();
        assert_eq!(written.len(), 6);

        let csv = CsvMetadataProvider::new(dir.path(), 3);
        for fold in 0..3 {
            for split in [Split::Train, Split::Test] {
                assert_eq!(
                    csv.partition(fold, split).unwrap(),
                    provider.partition(fold, split).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_read_without_id_column_uses_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fold_0_test.csv");
        fs::write(&path, "image_path,class_label\nairport/1.jpg,3\nbeach/7.jpg,8\n").unwrap();

        let records = CsvMetadataProvider::new(dir.path(), 5)
            .partition(0, Split::Test)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_str(), "airport/1.jpg");
        assert_eq!(records[1].class_label, 8);
    }

    #[test]
    fn test_missing_file_is_metadata_format() {
        let dir = TempDir::new().unwrap();
        let result = CsvMetadataProvider::new(dir.path(), 5).partition(1, Split::Train);
        assert!(matches!(result, Err(SceneError::MetadataFormat(_))));
    }

    #[test]
    fn test_malformed_label_is_metadata_format() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("fold_0_train.csv"),
            "id,image_path,class_label\n1,airport/1.jpg,airport\n",
        )
        .unwrap();
        let result = CsvMetadataProvider::new(dir.path(), 5).partition(0, Split::Train);
        assert!(matches!(result, Err(SceneError::MetadataFormat(_))));
    }

    #[test]
    fn test_missing_required_column_is_metadata_format() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("fold_0_test.csv"), "id,image_path\n1,airport/1.jpg\n").unwrap();
        let result = CsvMetadataProvider::new(dir.path(), 5).partition(0, Split::Test);
        assert!(matches!(result, Err(SceneError::MetadataFormat(_))));
    }

    #[test]
    fn test_fold_partition_from_csv() {
        let dir = TempDir::new().unwrap();
        let provider = FixedProvider::new(2);
        export_folds(&provider, dir.path(), &[1]).unwrap();

        let partition: FoldPartition = CsvMetadataProvider::new(dir.path(), 2)
            .fold_partition(1)
            .unwrap();
        assert_eq!(partition.test.len(), 6);
        assert_eq!(partition.train.len(), 6);
    }
}
