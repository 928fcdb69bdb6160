#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, missing_docs)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Binary entrypoint that wires the Tracklet services together and runs
//! until shutdown.

pub mod bootstrap;
pub mod control;
pub mod error;

use error::AppResult;

/// Bootstraps the Tracklet service and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    bootstrap::run_app().await
}
