//! Process wiring shared by the commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mend_core::{MendConfig, HEAL_QUEUE, RUN_QUEUE};
use mend_heal::{
    HealError, HealResult, HealScheduler, HealWorker, LlmRepairService, Recovery,
    RecoveryReport, RepairRequest, RepairResponse, RepairService,
};
use mend_queue::{Consumer, MemoryQueue};
use mend_runner::{PlaywrightExecutor, RunWorker};
use mend_store::{SqliteStore, Store};
use tracing::{info, warn};

use crate::commands::GlobalArgs;

/// Repair service used when no model API key is configured.
///
/// Deterministic strategies still run; anything that needs the model fails
/// the attempt with a clear error.
struct UnconfiguredRepair;

#[async_trait]
impl RepairService for UnconfiguredRepair {
    async fn repair(&self, _request: &RepairRequest) -> HealResult<RepairResponse> {
        Err(HealError::RepairService(
            "AI repair unavailable: set OPENAI_API_KEY or ANTHROPIC_API_KEY".to_string(),
        ))
    }
}

/// Load configuration: defaults, optional file, environment, then flags.
pub fn load_config(global: &GlobalArgs) -> Result<MendConfig> {
    let mut config = MendConfig::load(global.config.as_deref())
        .with_context(|| "Failed to load configuration")?;

    if let Some(root) = &global.repo_root {
        if config.paths.run_logs_dir.is_relative() {
            config.paths.run_logs_dir = root.join(&config.paths.run_logs_dir);
        }
        config.paths.repo_root = root.clone();
    }
    Ok(config)
}

/// Store, queues and configuration of one process.
pub struct Services {
    pub config: MendConfig,
    pub store: Arc<dyn Store>,
    pub queue: MemoryQueue,
}

impl Services {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let config = load_config(global)?;
        let db = database_path(global, &config);
        let store = SqliteStore::open(&db)
            .with_context(|| format!("Failed to open store at {}", db.display()))?;

        Ok(Self {
            config,
            store: Arc::new(store),
            queue: MemoryQueue::new(),
        })
    }

    pub fn scheduler(&self) -> Arc<HealScheduler> {
        Arc::new(HealScheduler::new(
            self.store.clone(),
            Arc::new(self.queue.clone()),
            self.config.heal.clone(),
        ))
    }

    fn repair_service(&self) -> Arc<dyn RepairService> {
        match LlmRepairService::from_env() {
            Ok(service) => {
                info!(
                    "AI repair enabled ({:?}, model {})",
                    service.provider(),
                    service.model()
                );
                Arc::new(service)
            }
            Err(err) => {
                warn!("{}; only deterministic repairs will be applied", err);
                Arc::new(UnconfiguredRepair)
            }
        }
    }

    pub fn run_worker(&self) -> Arc<RunWorker> {
        Arc::new(
            RunWorker::new(
                self.store.clone(),
                Arc::new(PlaywrightExecutor::new()),
                &self.config.paths,
            )
            .with_hook(self.scheduler()),
        )
    }

    pub fn heal_worker(&self) -> Arc<HealWorker> {
        Arc::new(HealWorker::new(
            self.store.clone(),
            Arc::new(self.queue.clone()),
            self.repair_service(),
            self.config.heal.clone(),
            self.config.paths.clone(),
        ))
    }

    /// Enqueue again the work a previous process left in the store.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        Recovery::new(
            self.store.clone(),
            Arc::new(self.queue.clone()),
            &self.config.heal,
        )
        .sweep()
        .await
        .with_context(|| "Failed to recover stored work")
    }

    /// Start consumers on both queues.
    pub fn start_workers(&self, run_concurrency: usize) -> Vec<Consumer> {
        vec![
            self.queue.consume(RUN_QUEUE, self.run_worker(), run_concurrency),
            self.queue
                .consume(HEAL_QUEUE, self.heal_worker(), self.config.heal.worker_concurrency),
        ]
    }

    /// Process everything queued (and everything it enqueues), then close.
    pub async fn process_until_idle(&self, timeout: Duration) -> Result<()> {
        let consumers = self.start_workers(1);
        let drained = self.queue.drain(timeout).await;
        for consumer in consumers {
            consumer.join().await;
        }
        drained.with_context(|| "Queues did not become idle")
    }
}

fn database_path(global: &GlobalArgs, config: &MendConfig) -> PathBuf {
    match &global.db {
        Some(db) => db.clone(),
        None => config.paths.repo_root.join("testmend.db"),
    }
}
