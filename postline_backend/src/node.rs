use crate::api::{self, AppState};
use crate::bootstrap::{self, BootstrapResources};
use crate::config::PostlineConfig;
use crate::database::repositories::PostRepository;
use crate::database::Database;
use crate::effects::{BackgroundTasks, PostEffects};
use crate::index::{MemoryIndex, SearchIndex};
use crate::metrics::{describe_metrics, PostMetrics, RecorderMetrics};
use crate::plugins::PluginRegistry;
use crate::posting::PostService;
use crate::realtime::EventHub;
use crate::search::SearchService;
use crate::webhooks::WebhookDispatcher;
use anyhow::{Context, Result};
use std::sync::Arc;

const BACKFILL_BATCH: usize = 1_000;

/// Bootstraps the backend once and hands out cloned service handles to
/// whichever entrypoint (CLI or REST server) needs them.
pub struct PostlineNode {
    config: PostlineConfig,
    bootstrap: BootstrapResources,
    tasks: BackgroundTasks,
    hub: EventHub,
    posts: PostService,
    search: SearchService,
}

impl PostlineNode {
    pub async fn start(config: PostlineConfig) -> Result<Self> {
        Self::start_with_plugins(config, PluginRegistry::new()).await
    }

    /// Like [`start`](Self::start) with hooks registered up front.
    pub async fn start_with_plugins(config: PostlineConfig, plugins: PluginRegistry) -> Result<Self> {
        let bootstrap = bootstrap::initialize(&config).await?;
        describe_metrics();
        let metrics: Arc<dyn PostMetrics> = Arc::new(RecorderMetrics);
        let (tasks, hub) = (BackgroundTasks::new(), EventHub::default());
        let database = bootstrap.database.clone();

        let mut effects = PostEffects::new(
            database.clone(),
            tasks.clone(),
            hub.clone(),
            Arc::new(plugins),
            metrics,
        );
        let mut search = SearchService::new(database.clone(), Arc::new(database.clone()), config.search.clone());

        if config.search.enable_indexing {
            let index: Arc<dyn SearchIndex> = Arc::new(MemoryIndex::new());
            let indexed = backfill_index(&database, Arc::clone(&index)).await?;
            tracing::info!(indexed, "search index ready");
            effects = effects.with_index(Arc::clone(&index));
            search = search.with_index(index);
        }
        if config.posts.enable_outgoing_webhooks {
            effects = effects.with_webhooks(WebhookDispatcher::new()?);
        }

        let posts = PostService::new(database, config.posts.clone(), effects);

        tracing::info!(
            directories_created = ?bootstrap.directories_created,
            database_initialized = bootstrap.database_initialized,
            db_path = %config.paths.db_path.display(),
            "postline node initialized"
        );

        Ok(Self {
            config,
            bootstrap,
            tasks,
            hub,
            posts,
            search,
        })
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            config: self.config.clone(),
            database: self.bootstrap.database.clone(),
            posts: self.posts.clone(),
            search: self.search.clone(),
            hub: self.hub.clone(),
        }
    }

    /// Runs the REST API server until shutdown, then drains background work.
    pub async fn run_http_server(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let state = AppState {
            config: snapshot.config,
            posts: snapshot.posts,
            search: snapshot.search,
            hub: snapshot.hub,
        };
        let result = api::serve_http(state).await;
        self.shutdown().await;
        result
    }

    /// Waits for detached effects still running.
    pub async fn shutdown(&self) {
        let in_flight = self.tasks.in_flight();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for background effects");
        }
        self.tasks.wait_idle().await;
    }

    pub fn database(&self) -> Database {
        self.bootstrap.database.clone()
    }

    pub fn posts(&self) -> &PostService {
        &self.posts
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }
}

/// Cloned handles for consumers that do not own the node.
#[derive(Clone)]
pub struct NodeSnapshot {
    pub config: PostlineConfig,
    pub database: Database,
    pub posts: PostService,
    pub search: SearchService,
    pub hub: EventHub,
}

/// Loads every live post into a freshly created index.
async fn backfill_index(database: &Database, index: Arc<dyn SearchIndex>) -> Result<usize> {
    let database = database.clone();
    tokio::task::spawn_blocking(move || {
        let mut offset = 0;
        loop {
            let batch = database.with_repositories(|repos| repos.posts().list_indexable(offset, BACKFILL_BATCH))?;
            for (post, team_id) in &batch {
                index
                    .index_post(post, team_id)
                    .with_context(|| format!("failed to index post {}", post.id))?;
            }
            offset += batch.len();
            if batch.len() < BACKFILL_BATCH {
                return Ok(offset);
            }
        }
    })
    .await
    .context("index backfill task failed")?
}
