//! # Search Aggregation
//!
//! Blends local search results with the upstream feed's. Both searches run
//! concurrently; only a local failure fails the request.
//!
//! Merge policy (higher downloads, local wins ties): local results are
//! walked first, then upstream results. The first occurrence of an id
//! (case-insensitive) claims a slot; a later entry for the same id replaces
//! it only with strictly more total downloads. Slots keep first-seen order.

use crate::error::AppResult;
use crate::mirror::Mirror;
use crate::search::{
    AutocompleteResponse, DependentsResponse, SearchRequest, SearchResponse, SearchResult,
};
use crate::store::SearchService;
use crate::types::PackageId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct SearchAggregator {
    local: Arc<dyn SearchService>,
    mirror: Arc<dyn Mirror>,
}

impl SearchAggregator {
    pub fn new(local: Arc<dyn SearchService>, mirror: Arc<dyn Mirror>) -> Self {
        Self { local, mirror }
    }

    pub async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> AppResult<SearchResponse> {
        let (local, upstream) = tokio::join!(
            self.local.search(request),
            self.mirror.search(request, cancel)
        );

        let local = local?;
        let upstream = match upstream {
            Ok(Some(response)) => response.data,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(query = %request.query, error = %e, "Upstream search failed, serving local results only");
                Vec::new()
            }
        };

        debug!(
            local = local.data.len(),
            upstream = upstream.len(),
            "Merging search results"
        );
        Ok(SearchResponse::from_results(
            merge_results(local.data, upstream),
            None,
        ))
    }

    /// Autocomplete is answered from the local index only.
    pub async fn autocomplete(&self, request: &SearchRequest) -> AppResult<AutocompleteResponse> {
        self.local.autocomplete(request).await
    }

    pub async fn find_dependents(
        &self,
        id: &PackageId,
        take: usize,
    ) -> AppResult<DependentsResponse> {
        self.local.find_dependents(id, take).await
    }
}

/// Deterministic merge of local and upstream results; see the module docs.
pub fn merge_results(local: Vec<SearchResult>, upstream: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut slots: Vec<SearchResult> = Vec::with_capacity(local.len() + upstream.len());
    let mut by_id: HashMap<PackageId, usize> = HashMap::new();

    for candidate in local.into_iter().chain(upstream) {
        match by_id.get(&candidate.package_id) {
            Some(&slot) => {
                if candidate.total_downloads > slots[slot].total_downloads {
                    slots[slot] = candidate;
                }
            }
            None => {
                by_id.insert(candidate.package_id.clone(), slots.len());
                slots.push(candidate);
            }
        }
    }
    slots
}
