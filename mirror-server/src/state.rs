//! # Application State Management
//!
//! [`AppState`] holds everything request handlers share: the local store,
//! the mirror coordinator and the search aggregator, plus the
//! configuration the server was started with. It is built once at startup
//! and handed to axum behind an `Arc`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_server::config::Config;
//! use mirror_server::state::AppState;
//!
//! # async fn build() -> anyhow::Result<()> {
//! let config = Config::default();
//! let state = AppState::open(config, "./data".into(), "http://localhost:5000".into()).await?;
//! let shared = Arc::new(state);
//! # Ok(())
//! # }
//! ```

use crate::aggregate::SearchAggregator;
use crate::config::Config;
use crate::indexer::NupkgIndexer;
use crate::mirror::{build_mirror, Mirror};
use crate::store::{FilePackageStore, PackageStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Base directory path where all package files are stored
    pub data_dir: PathBuf,
    /// Full server address including scheme, host, and port (e.g., "http://localhost:5000")
    pub server_addr: String,
    pub packages: Arc<dyn PackageStore>,
    pub mirror: Arc<dyn Mirror>,
    pub search: Arc<SearchAggregator>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Open the store under `data_dir` and wire the mirror and search
    /// services around it.
    pub async fn open(config: Config, data_dir: PathBuf, server_addr: String) -> anyhow::Result<Self> {
        let store = Arc::new(FilePackageStore::open(&data_dir).await?);
        let indexer = Arc::new(NupkgIndexer::new(store.clone()));
        let mirror = build_mirror(
            &config.mirror,
            store.clone(),
            indexer,
            registration_base(&server_addr),
        )?;
        let search = Arc::new(SearchAggregator::new(store.clone(), mirror.clone()));

        Ok(AppState {
            data_dir,
            server_addr,
            packages: store,
            mirror,
            search,
            config: Arc::new(config),
        })
    }

    /// Absolute URL of `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_addr.trim_end_matches('/'), path)
    }

    pub fn registration_base(&self) -> String {
        registration_base(&self.server_addr)
    }
}

/// This server's package metadata resource; the `@base` of search contexts.
pub fn registration_base(server_addr: &str) -> String {
    format!("{}/v3/registration/", server_addr.trim_end_matches('/'))
}
