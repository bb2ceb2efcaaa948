//! HTTP server setup and route handlers for the mirroring feed.
//!
//! | route                                      | handler              |
//! |--------------------------------------------|----------------------|
//! | `GET /v3/index.json`                       | [`service_index`]    |
//! | `GET /v3/package/{id}/index.json`          | [`package_versions`] |
//! | `GET /v3/package/{id}/{version}/{file}`    | [`download_package`] |
//! | `GET /v3/registration/{id}/index.json`     | [`registration_index`] |
//! | `GET /v3/search`                           | [`search`]           |
//! | `GET /v3/autocomplete`                     | [`autocomplete`]     |
//! | `GET /v3/dependents`                       | [`dependents`]       |
//! | `GET /api/status`                          | [`status`]           |
//!
//! Every handler owns a cancellation token that fires if the request is
//! dropped, so a client disconnect stops upstream and indexing work.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, MirrorError};
use crate::registration::{self, RegistrationIndex};
use crate::search::{AutocompleteResponse, DependentsResponse, SearchRequest, SearchResponse};
use crate::state::AppState;
use crate::validation::{validate_hostname, validate_package_id, validate_port, validate_version};

/// Token for one request; cancelled when the guard (and so the handler
/// future) is dropped.
fn request_token() -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v3/index.json", get(service_index))
        .route("/v3/package/{id}/index.json", get(package_versions))
        .route("/v3/package/{id}/{version}/{file}", get(download_package))
        .route("/v3/registration/{id}/index.json", get(registration_index))
        .route("/v3/search", get(search))
        .route("/v3/autocomplete", get(autocomplete))
        .route("/v3/dependents", get(dependents))
        .route("/api/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config, host: String, port: u16, data_dir: PathBuf) -> Result<()> {
    info!("Starting mirror feed server");

    validate_hostname(&host).with_context(|| format!("Invalid host parameter: {host}"))?;
    validate_port(port).with_context(|| format!("Invalid port parameter: {port}"))?;

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let abs_data_dir = std::fs::canonicalize(&data_dir)
        .with_context(|| format!("Failed to resolve data directory {}", data_dir.display()))?;
    info!(data_dir = %abs_data_dir.display(), "Using data directory");

    let server_addr = config.public_url(&host, port);
    let state = AppState::open(config, abs_data_dir, server_addr.clone()).await?;
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid socket address {host}:{port}"))?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    println!("✅ Feed is running on {server_addr}");
    println!("   Service index: {server_addr}/v3/index.json");
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal, stopping gracefully");
        })
        .await
        .context("Server error")?;

    Ok(())
}

pub async fn service_index(State(state): State<Arc<AppState>>) -> Json<Value> {
    let resource = |path: &str, kind: &str| json!({ "@id": state.url(path), "@type": kind });

    let mut resources = vec![resource("/v3/package/", "PackageBaseAddress/3.0.0")];
    for kind in [
        "RegistrationsBaseUrl",
        "RegistrationsBaseUrl/3.0.0-rc",
        "RegistrationsBaseUrl/3.0.0-beta",
        "RegistrationsBaseUrl/3.4.0",
        "RegistrationsBaseUrl/3.6.0",
    ] {
        resources.push(resource("/v3/registration/", kind));
    }
    for kind in [
        "SearchQueryService",
        "SearchQueryService/3.0.0-beta",
        "SearchQueryService/3.0.0-rc",
        "SearchQueryService/3.5.0",
    ] {
        resources.push(resource("/v3/search", kind));
    }
    for kind in [
        "SearchAutocompleteService",
        "SearchAutocompleteService/3.0.0-beta",
        "SearchAutocompleteService/3.0.0-rc",
        "SearchAutocompleteService/3.5.0",
    ] {
        resources.push(resource("/v3/autocomplete", kind));
    }

    Json(json!({ "version": "3.0.0", "resources": resources }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub versions: Vec<String>,
}

pub async fn package_versions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<VersionsResponse>> {
    let id = validate_package_id(&id)?;
    let (cancel, _guard) = request_token();

    let versions = match state.mirror.find_versions_or_none(&id, &cancel).await? {
        Some(versions) => versions,
        None => state
            .packages
            .find_all(&id, true)
            .await?
            .into_iter()
            .map(|p| p.version)
            .collect(),
    };

    if versions.is_empty() {
        return Err(AppError::NotFound(format!("Package {id} not found")));
    }
    Ok(Json(VersionsResponse {
        versions: versions
            .iter()
            .map(|v| v.to_normalized().to_ascii_lowercase())
            .collect(),
    }))
}

pub async fn download_package(
    State(state): State<Arc<AppState>>,
    Path((id, version, file)): Path<(String, String, String)>,
) -> AppResult<Response> {
    let id = validate_package_id(&id)?;
    let version = validate_version(&version)?;
    if !file.to_ascii_lowercase().ends_with(".nupkg") {
        return Err(AppError::NotFound(format!("No such package file: {file}")));
    }
    let (cancel, _guard) = request_token();

    state.mirror.mirror(&id, &version, &cancel).await?;

    let content = state
        .packages
        .open_content(&id, &version)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Package {id} {version} not found")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}.{}.nupkg\"",
                    id.lower(),
                    version.to_normalized().to_ascii_lowercase()
                ),
            ),
        ],
        Body::from_stream(ReaderStream::new(content)),
    )
        .into_response())
}

pub async fn registration_index(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<RegistrationIndex>> {
    let id = validate_package_id(&id)?;
    let (cancel, _guard) = request_token();

    let packages = match state.mirror.find_packages_or_none(&id, &cancel).await {
        Ok(Some(packages)) => packages,
        Ok(None) => state.packages.find_all(&id, true).await?,
        Err(MirrorError::Cancelled) => return Err(MirrorError::Cancelled.into()),
        Err(e) => {
            warn!(package_id = %id, error = %e, "Upstream metadata unusable, serving local records");
            state.packages.find_all(&id, true).await?
        }
    };

    registration::build_index(state.server_addr.trim_end_matches('/'), &packages)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Package {id} not found")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub q: Option<String>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
    pub prerelease: Option<bool>,
    pub sem_ver_level: Option<String>,
    pub package_type: Option<String>,
    pub framework: Option<String>,
}

impl SearchQuery {
    pub fn to_request(&self, config: &Config) -> SearchRequest {
        SearchRequest {
            query: self.q.clone().unwrap_or_default(),
            skip: self.skip.unwrap_or(0),
            take: config.search.clamp_take(self.take),
            include_prerelease: self.prerelease.unwrap_or(false),
            include_semver2: self.sem_ver_level.as_deref() == Some("2.0.0"),
            package_type: self.package_type.clone(),
            framework: self.framework.clone(),
        }
    }
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let request = query.to_request(&state.config);
    let (cancel, _guard) = request_token();
    Ok(Json(state.search.search(&request, &cancel).await?))
}

pub async fn autocomplete(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<AutocompleteResponse>> {
    let request = query.to_request(&state.config);
    Ok(Json(state.search.autocomplete(&request).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DependentsQuery {
    #[serde(rename = "packageId")]
    pub package_id: Option<String>,
    pub take: Option<usize>,
}

pub async fn dependents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DependentsQuery>,
) -> AppResult<Json<DependentsResponse>> {
    let raw = query
        .package_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("packageId is required".to_string()))?;
    let id = validate_package_id(raw)?;
    let take = state.config.search.clamp_take(query.take);

    Ok(Json(state.search.find_dependents(&id, take).await?))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "mirror-server",
        "version": env!("CARGO_PKG_VERSION"),
        "server_addr": state.server_addr,
        "data_directory": state.data_dir.display().to_string(),
        "mirror": {
            "enabled": state.mirror.is_enabled(),
            "package_source": state.config.mirror.package_source,
            "joined_mirrors": state.mirror.joined_mirrors(),
        },
    }))
}
