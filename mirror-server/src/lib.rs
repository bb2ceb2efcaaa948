//! # Mirroring Package Feed Server
//!
//! A NuGet v3 package feed that transparently mirrors an upstream feed.
//! Requests for a package version unknown locally pull it from upstream and
//! index it; searches blend local results with the upstream feed's.
//!
//! ## Key Modules
//!
//! - [`mirror`]: lookup-or-mirror coordinator and its disabled stand-in
//! - [`aggregate`]: concurrent local + upstream search and the result merge
//! - [`translate`]: upstream registration metadata to local records
//! - [`inflight`]: shares one download between concurrent mirror requests
//! - [`upstream`]: the upstream feed contract and its NuGet v3 client
//! - [`store`]: local package store and local search
//! - [`indexer`]: `.nupkg` archive to stored record
//! - [`server`]: HTTP routes
//! - [`config`], [`state`], [`error`]: configuration, shared state, errors

pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod error;
pub mod indexer;
pub mod inflight;
pub mod mirror;
pub mod package;
pub mod registration;
pub mod search;
pub mod server;
pub mod state;
pub mod store;
pub mod tempstream;
pub mod translate;
pub mod types;
pub mod upstream;
pub mod validation;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode, MirrorError, MirrorResult};
pub use mirror::{build_mirror, Mirror, MirrorService, NullMirrorService};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use types::{PackageId, PackageVersion};
