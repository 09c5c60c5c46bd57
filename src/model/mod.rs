// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The persistable protocol. Every row shape declares its table, columns,
//! primary key and the schema version each column appeared in through a
//! [`ModelSpec`] registered as an associated const; the persistence layer
//! consults these descriptors to generate SQL instead of reflecting over
//! values at write time.

pub mod actors;
pub mod blocks;
pub mod chain;
pub mod messages;
pub mod msapprovals;
pub mod reports;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bigint::BigInt;
use crate::storage::StorageError;

/// Major version of the database schema this binary writes.
pub const MAJOR_VERSION: u64 = 2;

/// A `(major, patch)` schema version. Patches migrate within a major;
/// column visibility is gated on the major alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, patch: u64) -> Self {
        Self { major, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, patch) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid schema version {:?}", s))?;
        Ok(Version {
            major: major.parse().map_err(|e| format!("{}", e))?,
            patch: patch.parse().map_err(|e| format!("{}", e))?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    PrimaryKey,
    Column,
    /// Present on the struct, never persisted.
    Ignored,
}

/// Descriptor of one column of a model.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    pub column: &'static str,
    pub kind: FieldKind,
    /// Major schema version the column first appeared in; `None` means it
    /// has existed since the base schema.
    pub since: Option<u64>,
}

impl FieldSpec {
    pub const fn pk(column: &'static str) -> Self {
        Self {
            column,
            kind: FieldKind::PrimaryKey,
            since: None,
        }
    }

    pub const fn col(column: &'static str) -> Self {
        Self {
            column,
            kind: FieldKind::Column,
            since: None,
        }
    }

    pub const fn col_since(column: &'static str, major: u64) -> Self {
        Self {
            column,
            kind: FieldKind::Column,
            since: Some(major),
        }
    }

    pub const fn ignored(column: &'static str) -> Self {
        Self {
            column,
            kind: FieldKind::Ignored,
            since: None,
        }
    }

    /// Whether the column exists in a schema of the given major version.
    pub fn included_at(&self, major: u64) -> bool {
        if self.kind == FieldKind::Ignored {
            return false;
        }
        self.since.map_or(true, |s| s <= major)
    }

    pub fn is_pk(&self) -> bool {
        self.kind == FieldKind::PrimaryKey
    }
}

/// Descriptor of a model: its table and column set.
#[derive(Clone, Copy, Debug)]
pub struct ModelSpec {
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
    /// Major schema version the table first appeared in. Persisting into an
    /// older schema silently succeeds without writing.
    pub since: Option<u64>,
}

impl ModelSpec {
    pub const fn new(table: &'static str, fields: &'static [FieldSpec]) -> Self {
        Self {
            table,
            fields,
            since: None,
        }
    }

    pub const fn since(table: &'static str, fields: &'static [FieldSpec], major: u64) -> Self {
        Self {
            table,
            fields,
            since: Some(major),
        }
    }

    /// Whether the table exists at all in a schema of the given major.
    pub fn supported_at(&self, major: u64) -> bool {
        self.since.map_or(true, |s| s <= major)
    }
}

/// A column value ready for binding.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    OptInt(Option<i64>),
    Float(f64),
    Text(String),
    OptText(Option<String>),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Arbitrary-precision integer bound as its decimal rendering.
    Numeric(String),
    TextArray(Vec<String>),
    Json(Option<serde_json::Value>),
    Timestamp(DateTime<Utc>),
    OptTimestamp(Option<DateTime<Utc>>),
}

impl Value {
    /// JSON rendering, shared by the in-memory storage and report queries.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Int(v) => json!(v),
            Value::OptInt(v) => json!(v),
            Value::Float(v) => json!(v),
            Value::Text(v) => json!(v),
            Value::OptText(v) => json!(v),
            Value::Bool(v) => json!(v),
            Value::Bytes(v) => json!(v
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>()),
            Value::Numeric(v) => json!(v),
            Value::TextArray(v) => json!(v),
            Value::Json(v) => v.clone().unwrap_or(serde_json::Value::Null),
            Value::Timestamp(v) => json!(v.to_rfc3339()),
            Value::OptTimestamp(v) => json!(v.map(|t| t.to_rfc3339())),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        Value::OptInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        Value::OptText(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&BigInt> for Value {
    fn from(v: &BigInt) -> Self {
        Value::Numeric(v.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::TextArray(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Option<DateTime<Utc>>> for Value {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        Value::OptTimestamp(v)
    }
}

/// A row shape with a registered descriptor. `values` returns column values
/// in the exact order of `SPEC.fields`.
pub trait ModelRow {
    const SPEC: &'static ModelSpec;

    fn values(&self) -> Vec<Value>;
}

/// An open, version-aware write batch. One batch is one transaction.
#[async_trait]
pub trait StorageBatch: Send {
    /// Active schema version of the target store.
    fn version(&self) -> Version;

    /// Persists one row under the batch's schema version; columns the
    /// version does not know are elided, unknown tables are skipped.
    async fn persist_row(
        &mut self,
        spec: &'static ModelSpec,
        values: Vec<Value>,
    ) -> Result<(), StorageError>;
}

/// Anything that can persist itself into an open batch.
#[async_trait]
pub trait Persistable: Send + Sync {
    async fn persist(&self, batch: &mut dyn StorageBatch) -> Result<(), StorageError>;
}

/// Implements [`Persistable`] for a [`ModelRow`] type.
macro_rules! impl_persistable {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl $crate::model::Persistable for $ty {
            async fn persist(
                &self,
                batch: &mut dyn $crate::model::StorageBatch,
            ) -> Result<(), $crate::storage::StorageError> {
                batch
                    .persist_row(
                        <Self as $crate::model::ModelRow>::SPEC,
                        $crate::model::ModelRow::values(self),
                    )
                    .await
            }
        }
    };
}
pub(crate) use impl_persistable;

#[async_trait]
impl<T: Persistable> Persistable for Vec<T> {
    async fn persist(&self, batch: &mut dyn StorageBatch) -> Result<(), StorageError> {
        for item in self {
            item.persist(batch).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Persistable> Persistable for Option<T> {
    async fn persist(&self, batch: &mut dyn StorageBatch) -> Result<(), StorageError> {
        if let Some(item) = self {
            item.persist(batch).await?;
        }
        Ok(())
    }
}

/// Heterogeneous composite of persistables, written sequentially within one
/// batch.
#[derive(Default)]
pub struct PersistableList(pub Vec<Box<dyn Persistable>>);

impl PersistableList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, p: impl Persistable + 'static) -> &mut Self {
        self.0.push(Box::new(p));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
impl Persistable for PersistableList {
    async fn persist(&self, batch: &mut dyn StorageBatch) -> Result<(), StorageError> {
        for item in &self.0 {
            item.persist(batch).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_and_parse() {
        assert!(Version::new(1, 2) < Version::new(2, 0));
        assert!(Version::new(1, 2) < Version::new(1, 3));
        assert_eq!("1.3".parse::<Version>().unwrap(), Version::new(1, 3));
        assert_eq!(Version::new(2, 0).to_string(), "2.0");
        assert!("3".parse::<Version>().is_err());
    }

    #[test]
    fn field_version_gating() {
        let base = FieldSpec::col("x");
        let added = FieldSpec::col_since("y", 2);
        let ignored = FieldSpec::ignored("z");
        assert!(base.included_at(1));
        assert!(!added.included_at(1));
        assert!(added.included_at(2));
        assert!(!ignored.included_at(9));
    }
}
