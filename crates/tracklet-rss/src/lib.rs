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

//! The RSS pipeline: feed fetching and parsing, the two-gate eligibility
//! engine with compiled matchers, and the per-feed scheduler that drives
//! discovery, de-duplication, detail fetch, download and dispatch handoff.

pub mod eligibility;
pub mod feed;
pub mod matcher;
pub mod scheduler;

pub use eligibility::{Eligibility, EligibilityReason, evaluate};
pub use feed::{FeedError, FeedItem, parse_feed};
pub use matcher::{CompiledMatcher, MatcherCache, MatcherError, validate_rule};
pub use scheduler::{RssScheduler, SchedulerDeps};
