use std::fmt;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use stockwatch_adapters::{CatalogAdapter, GamesIslandAdapter};
use stockwatch_core::{ChangeSet, ProductSet};
use stockwatch_notify::{
    DiscordWebhook, NotificationBatcher, NotificationTransport, MAX_ITEMS_PER_MESSAGE,
};
use stockwatch_storage::{
    DocumentSource, FileStateStore, GistConfig, GistStateStore, HttpClientConfig, HttpFetcher,
    StateStore,
};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{MonitorConfig, StoreConfig};
use crate::diff::detect_changes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    LoadingState,
    Extracting,
    Diffing,
    Notifying,
    SavingState,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadingState => "loading state",
            Self::Extracting => "extracting",
            Self::Diffing => "diffing",
            Self::Notifying => "notifying",
            Self::SavingState => "saving state",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A run that ended in the `Failed` state. `stage` is where it broke and
/// `stages` the path taken, ending with `Failed`.
#[derive(Debug, Error)]
#[error("monitor run failed while {stage}")]
pub struct RunError {
    pub stage: RunStage,
    pub stages: Vec<RunStage>,
    #[source]
    pub source: anyhow::Error,
}

impl RunError {
    fn new(stage: RunStage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            stages: Vec::new(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Load, extract and diff, but neither notify nor save.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub first_run: bool,
    pub listing_fetched_at: DateTime<Utc>,
    pub scraped: usize,
    pub new_products: usize,
    pub restocked: usize,
    pub messages_sent: usize,
    pub state_saved: bool,
    pub stages: Vec<RunStage>,
}

/// One sequential pass: load state, extract, diff, notify, save.
pub struct MonitorPipeline {
    adapter: Box<dyn CatalogAdapter>,
    source: Box<dyn DocumentSource>,
    store: Option<Box<dyn StateStore>>,
    notifier: Option<Box<dyn NotificationTransport>>,
    batcher: NotificationBatcher,
}

impl MonitorPipeline {
    pub fn new(config: MonitorConfig) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;

        let store: Option<Box<dyn StateStore>> = match config.store {
            Some(StoreConfig::Gist {
                gist_id,
                token,
                filename,
                api_base,
            }) => Some(Box::new(GistStateStore::new(
                http.client().clone(),
                GistConfig {
                    api_base,
                    gist_id,
                    token,
                    filename,
                },
            ))),
            Some(StoreConfig::File { path }) => Some(Box::new(FileStateStore::new(path))),
            None => None,
        };

        let notifier = config
            .webhook_url
            .map(|url| -> Box<dyn NotificationTransport> {
                Box::new(DiscordWebhook::new(http.client().clone(), url))
            });

        Ok(Self {
            adapter: Box::new(GamesIslandAdapter::new(config.listing_url, config.base_url)),
            source: Box::new(http),
            store,
            notifier,
            batcher: NotificationBatcher::new(
                MAX_ITEMS_PER_MESSAGE,
                Duration::from_millis(config.notify_pacing_ms),
            ),
        })
    }

    pub fn with_adapter(mut self, adapter: Box<dyn CatalogAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_source(mut self, source: Box<dyn DocumentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_store(mut self, store: Option<Box<dyn StateStore>>) -> Self {
        self.store = store;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Box<dyn NotificationTransport>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_batcher(mut self, batcher: NotificationBatcher) -> Self {
        self.batcher = batcher;
        self
    }

    pub async fn run_once(&self, options: RunOptions) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("monitor_run", %run_id, source_id = self.adapter.source_id());
        let mut stages = Vec::new();
        let result = self
            .run_stages(run_id, options, &mut stages)
            .instrument(span)
            .await;
        match result {
            Ok(summary) => Ok(summary),
            Err(mut err) => {
                stages.push(RunStage::Failed);
                err.stages = stages;
                error!(
                    %run_id,
                    stage = %err.stage,
                    error = %format!("{:#}", err.source),
                    "monitor run failed"
                );
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        options: RunOptions,
        stages: &mut Vec<RunStage>,
    ) -> Result<RunSummary, RunError> {
        let started_at = Utc::now();
        info!(listing_url = self.adapter.listing_url(), "starting monitor run");

        stages.push(RunStage::LoadingState);
        let previous = self
            .load_state()
            .await
            .map_err(|e| RunError::new(RunStage::LoadingState, e))?;
        let first_run = previous.is_empty();
        if first_run {
            info!("first run, building initial state without notifications");
        }

        stages.push(RunStage::Extracting);
        let page = self
            .adapter
            .fetch_listing(self.source.as_ref())
            .await
            .map_err(|e| RunError::new(RunStage::Extracting, e))?;
        let current = self
            .adapter
            .parse_listing(&page)
            .map_err(|e| RunError::new(RunStage::Extracting, e))?;

        stages.push(RunStage::Diffing);
        let changes = detect_changes(&previous, &current);
        info!(
            new = changes.new_products.len(),
            restocked = changes.restocked.len(),
            "changes detected"
        );

        let mut messages_sent = 0;
        let mut state_saved = false;
        if options.dry_run {
            info!(pending = changes.len(), "dry run, skipping notifications and state save");
        } else {
            if !first_run && !changes.is_empty() {
                stages.push(RunStage::Notifying);
                messages_sent = self
                    .notify(&changes)
                    .await
                    .map_err(|e| RunError::new(RunStage::Notifying, e))?;
            }

            stages.push(RunStage::SavingState);
            state_saved = self
                .save_state(&current)
                .await
                .map_err(|e| RunError::new(RunStage::SavingState, e))?;
        }

        stages.push(RunStage::Done);
        info!("run complete");

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            first_run,
            listing_fetched_at: page.fetched_at,
            scraped: current.len(),
            new_products: changes.new_products.len(),
            restocked: changes.restocked.len(),
            messages_sent,
            state_saved,
            stages: std::mem::take(stages),
        })
    }

    async fn load_state(&self) -> anyhow::Result<ProductSet> {
        let Some(store) = &self.store else {
            warn!("no state store configured, starting with empty state");
            return Ok(ProductSet::new());
        };
        let state = store
            .load()
            .await
            .with_context(|| format!("loading state from {}", store.describe()))?;
        info!(products = state.len(), store = %store.describe(), "loaded previous state");
        Ok(state)
    }

    async fn notify(&self, changes: &ChangeSet) -> anyhow::Result<usize> {
        let Some(notifier) = &self.notifier else {
            warn!(pending = changes.len(), "no webhook configured, skipping notifications");
            return Ok(0);
        };
        self.batcher
            .notify(notifier.as_ref(), changes)
            .await
            .with_context(|| format!("sending notifications via {}", notifier.describe()))
    }

    async fn save_state(&self, state: &ProductSet) -> anyhow::Result<bool> {
        let Some(store) = &self.store else {
            warn!("no state store configured, skipping state save");
            return Ok(false);
        };
        store
            .save(state)
            .await
            .with_context(|| format!("saving state to {}", store.describe()))?;
        Ok(true)
    }
}

pub async fn run_once_from_env(options: RunOptions) -> anyhow::Result<RunSummary> {
    let pipeline = MonitorPipeline::new(MonitorConfig::from_env())?;
    Ok(pipeline.run_once(options).await?)
}
