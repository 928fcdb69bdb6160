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

//! Cross-site query services: the search fan-out with its TTL cache, and
//! the per-account statistics aggregator.

mod cache;
mod orchestrator;
mod userinfo;

pub use cache::TtlCache;
pub use orchestrator::{
    MultiSearchQuery, MultiSearchResult, SearchOrchestrator, SiteFailure,
};
pub use userinfo::{AggregatedStats, UserInfoService};
