use std::sync::Arc;

use tokio::task;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    preview::PreviewCache,
    source::ContentStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<ContentStore>,
    pub previews: Arc<PreviewCache>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<ContentStore>, previews: Arc<PreviewCache>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            previews,
        }
    }

    /// Opens the content store and the preview cache named by the config. An
    /// unusable cache directory is fatal.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(ContentStore::new(config.source_dir.clone()));
        let previews = Arc::new(PreviewCache::open(
            &config.cache_dir,
            config.source_dir.clone(),
        )?);
        Ok(Self::new(config, store, previews))
    }

    /// Runs filesystem work against the store off the async runtime.
    pub async fn with_store<F, T, E>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&ContentStore) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<AppError> + Send + 'static,
    {
        let store = self.store.clone();
        task::spawn_blocking(move || f(&store))
            .await?
            .map_err(Into::into)
    }
}
