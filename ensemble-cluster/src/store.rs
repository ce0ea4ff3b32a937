//! Local data plane contract
//!
//! The coordination layer never looks inside the storage engine; it only
//! executes commands against this trait. [`MemoryStore`] is a plain
//! in-process implementation used by the server binary and the tests.

use crate::error::{EnsembleError, Result};
use crate::types::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Storage operations commands execute against
pub trait Store: Send + Sync {
    /// Names of all buckets
    fn buckets(&self) -> Vec<String>;

    /// Create a bucket, no-op if it exists
    fn add_bucket(&self, bucket: &str) -> Result<()>;

    /// Drop a bucket and all its values
    fn remove_bucket(&self, bucket: &str) -> Result<()>;

    /// All keys of a bucket
    fn keys(&self, bucket: &str) -> Result<Vec<String>>;

    fn get_value(&self, bucket: &str, key: &str) -> Result<Option<Value>>;

    /// Values for the given keys; missing keys are left out
    fn get_values(&self, bucket: &str, keys: &[String]) -> Result<BTreeMap<String, Value>>;

    /// Store a value, creating the bucket if needed
    fn put_value(&self, bucket: &str, key: &str, value: Value) -> Result<()>;

    fn remove_value(&self, bucket: &str, key: &str) -> Result<()>;

    fn remove_values(&self, bucket: &str, keys: &[String]) -> Result<()>;

    /// Keys in `[start, end]` in lexicographic order, at most `limit` of them
    fn keys_in_range(
        &self,
        bucket: &str,
        start: &str,
        end: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>>;
}

fn bucket_not_found(bucket: &str) -> EnsembleError {
    EnsembleError::Processing(format!("bucket not found: {}", bucket))
}

/// In-memory store keeping each bucket ordered by key
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn buckets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn add_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets.write().entry(bucket.to_string()).or_default();
        Ok(())
    }

    fn remove_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets
            .write()
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| bucket_not_found(bucket))
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.read();
        let values = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        Ok(values.keys().cloned().collect())
    }

    fn get_value(&self, bucket: &str, key: &str) -> Result<Option<Value>> {
        let buckets = self.buckets.read();
        let values = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        Ok(values.get(key).cloned())
    }

    fn get_values(&self, bucket: &str, keys: &[String]) -> Result<BTreeMap<String, Value>> {
        let buckets = self.buckets.read();
        let values = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        Ok(keys
            .iter()
            .filter_map(|k| values.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn put_value(&self, bucket: &str, key: &str, value: Value) -> Result<()> {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove_value(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.write();
        let values = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        values.remove(key);
        Ok(())
    }

    fn remove_values(&self, bucket: &str, keys: &[String]) -> Result<()> {
        let mut buckets = self.buckets.write();
        let values = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }

    fn keys_in_range(
        &self,
        bucket: &str,
        start: &str,
        end: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let buckets = self.buckets.read();
        let values = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let in_range = values
            .range(start.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| end.map_or(true, |end| k.as_str() <= end))
            .cloned();
        Ok(match limit {
            Some(limit) => in_range.take(limit).collect(),
            None => in_range.collect(),
        })
    }
}
