pub mod auth;
pub mod cache;
pub mod checkpoint;
pub mod component;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod error;
pub mod notify;
pub mod observability;
pub mod retrieve;
pub mod storage;
pub mod tooling;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use cache::MetadataCacheService;
use checkpoint::service::CheckpointService;
use component::resolver::ComponentResolver;
use config::OrgdConfig;
use notify::{ConsoleSink, NotificationSink};
use retrieve::cli::CliRetrieveClient;
use retrieve::RetrieveClient;
use storage::Storage;

/// Shared application state handed to every command.
///
/// This is the single place production collaborators are constructed;
/// everything downstream receives them as `Arc`s or trait objects, so tests
/// compose the same structure with mocks instead.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<OrgdConfig>,
    pub storage: Arc<Storage>,
    pub retriever: Arc<dyn RetrieveClient>,
    pub notifier: Arc<dyn NotificationSink>,
    pub checkpoints: CheckpointService,
}

impl AppContext {
    /// Composition root wiring the default production collaborators.
    pub async fn new(config: OrgdConfig, quiet: bool) -> Result<Self> {
        let storage = Arc::new(
            Storage::new_with_slow_query(&config.db_path(), config.slow_query_threshold_ms)
                .await?,
        );
        let retriever: Arc<dyn RetrieveClient> = Arc::new(CliRetrieveClient::new(
            config.sf_binary.clone(),
            Duration::from_secs(config.retrieve_timeout_secs),
        ));
        let notifier: Arc<dyn NotificationSink> = Arc::new(ConsoleSink::new(quiet));
        let checkpoints = CheckpointService::spawn(config.checkpoints_path())?;
        Ok(Self {
            config: Arc::new(config),
            storage,
            retriever,
            notifier,
            checkpoints,
        })
    }

    /// Resolver scoped to the configured project and package directories.
    pub fn resolver(&self) -> ComponentResolver {
        ComponentResolver::new(&self.config.project_dir, &self.config.package_dirs)
    }

    /// Cache service bound to one org identity.
    pub fn cache_service(&self, username: &str) -> MetadataCacheService {
        MetadataCacheService::new(
            self.retriever.clone(),
            self.resolver(),
            username,
            self.config.cache_root.clone(),
            self.config.api_version.clone(),
        )
    }
}
