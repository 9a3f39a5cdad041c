//! Shared test doubles for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use pos_query_core::config::MiddlewareConfig;
use pos_query_core::database::QueryExecutor;
use pos_query_core::error::{QueryError, Result};
use pos_query_core::isolation::{BranchSharingConfig, EntityType, StaticBranchSettingsSource};
use pos_query_core::query_builder::QuerySpec;

/// In-memory executor that records every call it receives
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    delay: Duration,
    rows: Vec<Value>,
    fail_with: Option<String>,
    fetches: AtomicUsize,
    fetched_specs: Mutex<Vec<QuerySpec>>,
    inserted: Mutex<Vec<(EntityType, Map<String, Value>)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetched_specs(&self) -> Vec<QuerySpec> {
        self.fetched_specs.lock().clone()
    }

    pub fn inserted(&self) -> Vec<(EntityType, Map<String, Value>)> {
        self.inserted.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<Value>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched_specs.lock().push(spec.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.fail_with {
            return Err(QueryError::Upstream(message.clone()));
        }
        Ok(self.rows.clone())
    }

    async fn insert(&self, entity: &EntityType, row: Map<String, Value>) -> Result<Value> {
        self.inserted.lock().push((entity.clone(), row.clone()));
        let mut stored = row;
        stored.insert("id".to_string(), json!(self.inserted.lock().len()));
        Ok(Value::Object(stored))
    }
}

/// Branches used throughout the suites
pub fn branch_settings() -> StaticBranchSettingsSource {
    StaticBranchSettingsSource::new()
        .with_branch("B1", BranchSharingConfig::hybrid().with_share(EntityType::Products, false))
        .with_branch("B3", BranchSharingConfig::isolated())
        .with_branch("B4", BranchSharingConfig::shared())
        .with_failure("B2", "connection refused")
}

pub fn test_config() -> MiddlewareConfig {
    MiddlewareConfig::for_test()
}

pub fn product_rows() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "Screen protector", "branch_id": "B1"}),
        json!({"id": 2, "name": "USB-C cable", "branch_id": "B1"}),
    ]
}

/// Shorthand for building `Arc<RecordingExecutor>` alongside its trait object
pub fn executor(inner: RecordingExecutor) -> (Arc<RecordingExecutor>, Arc<dyn QueryExecutor>) {
    let concrete = Arc::new(inner);
    let dynamic: Arc<dyn QueryExecutor> = concrete.clone();
    (concrete, dynamic)
}
