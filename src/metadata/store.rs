//! SQLite-backed metadata provider

use std::path::{Path, PathBuf};

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, OpenFlags, Row, ToSql};
use tracing::debug;

use super::query::{fold_key, FoldOrdering, FoldQuery, FOLD_KEY_FUNCTION};
use super::{check_fold, FoldPartition, MetadataProvider, SampleId, SampleRecord, Split};
use crate::utils::error::{Result, SceneError};

/// Runs the fold query against a SQLite database
///
/// A read-only connection is opened for every call and closed when the call
/// returns, so the store holds no open handle between folds.
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    path: PathBuf,
    query: FoldQuery,
}

impl SqliteMetadataStore {
    pub fn new(path: impl Into<PathBuf>, query: FoldQuery) -> Self {
        Self {
            path: path.into(),
            query,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(SceneError::StoreUnavailable(format!(
                "database {} does not exist",
                self.path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.create_scalar_function(
            FOLD_KEY_FUNCTION,
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            fold_key_sql,
        )?;
        Ok(conn)
    }

    /// Run the query, returning each record with its bucket
    fn fetch(&self, split: Option<Split>, fold: usize) -> Result<Vec<(SampleRecord, usize)>> {
        let conn = self.connect()?;
        let sql = self.query.sql(split);
        let mut stmt = conn.prepare(&sql)?;

        let num_folds = self.query.num_folds() as i64;
        let max_per_class = self.query.max_per_class() as i64;
        let fold = fold as i64;
        let seed = match self.query.ordering() {
            FoldOrdering::Seeded { seed } => Some(seed as i64),
            FoldOrdering::Unseeded => None,
        };

        let mut params: Vec<(&str, &dyn ToSql)> = vec![
            (":num_folds", &num_folds),
            (":max_per_class", &max_per_class),
        ];
        if split.is_some() {
            params.push((":fold", &fold));
        }
        if let Some(seed) = seed.as_ref() {
            params.push((":seed", seed));
        }

        let mut rows = stmt.query(params.as_slice())?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(record_from_row(row)?);
        }
        debug!(
            db = %self.path.display(),
            fold,
            split = ?split,
            rows = records.len(),
            "Fold query complete"
        );
        Ok(records)
    }
}

impl MetadataProvider for SqliteMetadataStore {
    fn num_folds(&self) -> usize {
        self.query.num_folds()
    }

    fn partition(&self, fold: usize, split: Split) -> Result<Vec<SampleRecord>> {
        check_fold(fold, self.num_folds())?;
        Ok(self
            .fetch(Some(split), fold)?
            .into_iter()
            .map(|(record, _)| record)
            .collect())
    }

    /// Both sides come from a single query, so even an unseeded ordering
    /// yields disjoint train and test sets within the fold.
    fn fold_partition(&self, fold: usize) -> Result<FoldPartition> {
        check_fold(fold, self.num_folds())?;
        let (test, train): (Vec<_>, Vec<_>) = self
            .fetch(None, fold)?
            .into_iter()
            .partition(|(_, bucket)| *bucket == fold);
        FoldPartition::new(
            fold,
            train.into_iter().map(|(r, _)| r).collect(),
            test.into_iter().map(|(r, _)| r).collect(),
        )
    }
}

/// `fold_key(seed, id)` as seen from SQL; integer ids hash as their decimal text
fn fold_key_sql(ctx: &Context<'_>) -> rusqlite::Result<i64> {
    let seed: i64 = ctx.get(0)?;
    let key = match ctx.get_raw(1) {
        ValueRef::Integer(id) => fold_key(seed as u64, &id.to_string()),
        ValueRef::Text(text) => fold_key(seed as u64, &String::from_utf8_lossy(text)),
        ValueRef::Null => return Err(rusqlite::Error::InvalidFunctionParameterType(1, Type::Null)),
        ValueRef::Real(_) => return Err(rusqlite::Error::InvalidFunctionParameterType(1, Type::Real)),
        ValueRef::Blob(_) => return Err(rusqlite::Error::InvalidFunctionParameterType(1, Type::Blob)),
    };
    Ok(key)
}

fn record_from_row(row: &Row<'_>) -> Result<(SampleRecord, usize)> {
    let id = match row.get_ref(0)? {
        ValueRef::Integer(id) => SampleId::from(id),
        ValueRef::Text(text) => SampleId::new(String::from_utf8_lossy(text).into_owned()),
        other => {
            return Err(SceneError::MetadataFormat(format!(
                "id must be integer or text, got {}",
                other.data_type()
            )))
        }
    };
    let image_path = match row.get_ref(1)? {
        ValueRef::Text(text) => PathBuf::from(String::from_utf8_lossy(text).into_owned()),
        other => {
            return Err(SceneError::MetadataFormat(format!(
                "image_path of sample '{}' must be text, got {}",
                id,
                other.data_type()
            )))
        }
    };
    let class_label = match row.get_ref(2)? {
        ValueRef::Integer(label) => label,
        other => {
            return Err(SceneError::MetadataFormat(format!(
                "class_label of sample '{}' must be integer, got {}",
                id,
                other.data_type()
            )))
        }
    };
    let bucket: i64 = row.get(3)?;

    Ok((
        SampleRecord {
            id,
            image_path,
            class_label,
        },
        bucket as usize,
    ))
}
