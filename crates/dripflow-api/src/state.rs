//! Application state wiring the engine to the concrete infra implementations.

use std::path::PathBuf;

use anyhow::Context;
use dripflow_core::flow::scheduler::CampaignScheduler;
use dripflow_core::flow::step_runner::StepRunner;
use dripflow_infra::config::load_engine_config;
use dripflow_infra::filesystem::{database_url, resolve_data_dir};
use dripflow_infra::generator::LlmMessageGenerator;
use dripflow_infra::sqlite::execution::SqliteExecutionStateRepository;
use dripflow_infra::sqlite::flow::SqliteFlowRepository;
use dripflow_infra::sqlite::outbound::SqliteOutboundQueue;
use dripflow_infra::sqlite::pool::DatabasePool;
use dripflow_infra::sqlite::segment::SqliteSegmentResolver;
use dripflow_types::config::EngineConfig;

/// The scheduler generics pinned to SQLite storage and the LLM generator.
pub type ConcreteScheduler = CampaignScheduler<
    SqliteFlowRepository,
    SqliteSegmentResolver,
    SqliteExecutionStateRepository,
    LlmMessageGenerator,
    SqliteOutboundQueue,
>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub config: EngineConfig,
}

impl AppState {
    /// Resolve the data dir, load `config.toml`, open and migrate the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open database")?;

        Ok(Self {
            data_dir,
            db_pool,
            config,
        })
    }

    /// Build the scheduler. Fails when the LLM API key is not configured.
    pub fn scheduler(&self) -> anyhow::Result<ConcreteScheduler> {
        let generator = LlmMessageGenerator::from_config(&self.config.llm)?;
        let runner = StepRunner::new(
            SqliteExecutionStateRepository::new(self.db_pool.clone()),
            generator,
            SqliteOutboundQueue::new(self.db_pool.clone()),
            &self.config,
        );
        Ok(CampaignScheduler::new(
            SqliteFlowRepository::new(self.db_pool.clone()),
            SqliteSegmentResolver::new(self.db_pool.clone()),
            runner,
            &self.config,
        ))
    }
}
