//! Shared helpers for the pipeline integration tests.
//!
//! [`TestHarness`] wires a [`PipelineCoordinator`] to a scripted process
//! runner, an in-memory object store and a temporary working root.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use planet_dumper::config::Config;
use planet_dumper::notifications::{ActionStatus, ActionTracker};
use planet_dumper::pipeline::{CommandBuilder, CreateRequest, PipelineCoordinator, PublishTarget};
use planet_dumper::sequence::{SequenceStateResolver, StateSource};
use planet_dumper::storage::{CannedAcl, MemoryObjectStore, UploadOptions};
use planet_dumper_common::{CleanupMode, Result, SequenceNumber};
use planet_dumper_exec::{ScriptedRunner, WorkspaceManager};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

pub const BUCKET: &str = "geo-dumps";

/// Tracker that records every call instead of sending it anywhere.
#[derive(Default)]
pub struct RecordingTracker {
    pub created: Mutex<Vec<(SequenceNumber, Value)>>,
    pub updates: Mutex<Vec<(ActionStatus, Value)>>,
}

#[async_trait]
impl ActionTracker for RecordingTracker {
    async fn create_action(&self, state: SequenceNumber, metadata: Value) -> Result<()> {
        self.created.lock().push((state, metadata));
        Ok(())
    }

    async fn update_action(&self, status: ActionStatus, metadata: Value) -> Result<()> {
        self.updates.lock().push((status, metadata));
        Ok(())
    }
}

pub struct TestHarness {
    pub root: TempDir,
    pub runner: Arc<ScriptedRunner>,
    pub store: Arc<MemoryObjectStore>,
    pub tracker: Arc<RecordingTracker>,
}

impl TestHarness {
    pub fn new(runner: ScriptedRunner, store: MemoryObjectStore) -> Self {
        Self {
            root: TempDir::new().expect("failed to create temp dir"),
            runner: Arc::new(runner),
            store: Arc::new(store),
            tracker: Arc::new(RecordingTracker::default()),
        }
    }

    /// Harness whose bucket exists and whose tools all succeed.
    pub fn healthy() -> Self {
        Self::new(ScriptedRunner::new(), MemoryObjectStore::new().with_bucket(BUCKET))
    }

    pub fn coordinator(&self, source: &str) -> PipelineCoordinator {
        self.coordinator_with_config(source, &Config::default())
    }

    pub fn coordinator_with_config(&self, source: &str, config: &Config) -> PipelineCoordinator {
        let source: StateSource = source.parse().expect("invalid state source");
        let resolver = SequenceStateResolver::new(source, reqwest::Client::new())
            .with_object_store(self.store.clone());

        PipelineCoordinator::new(
            resolver,
            WorkspaceManager::new(self.root.path()),
            self.runner.clone(),
            Arc::new(CommandBuilder::from_config(config)),
        )
        .with_object_store(self.store.clone(), UploadOptions::default(), false)
        .with_action_tracker(self.tracker.clone())
    }
}

pub fn create_request() -> CreateRequest {
    CreateRequest {
        output_format: "planet-{state}.osm.pbf".to_string(),
        cleanup_mode: CleanupMode::None,
        resume: false,
        collect_info: false,
        lock_bucket: Some(BUCKET.to_string()),
        target: PublishTarget {
            bucket: BUCKET.to_string(),
            acl: Some(CannedAcl::PublicRead),
        },
        description: None,
    }
}
