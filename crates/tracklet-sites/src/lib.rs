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

//! Tracker backends: the compile-time site definition catalog, per-site rate
//! limiting with a persisted sliding window, multi-URL failover, and the
//! driver families that turn definitions into live [`tracklet_core::Site`]
//! instances.
//!
//! Definitions register through an explicit [`builtin::register_all`] call at
//! bootstrap; nothing mutates global state at load time.

pub mod builtin;
pub mod definition;
pub mod drivers;
pub mod factory;
pub mod failover;
pub mod http;
pub mod parse;
pub mod ratelimit;
pub mod registry;

pub use definition::{Endpoints, RateParams, SelectorRule, Selectors, SiteDefinition, SiteSchema};
pub use factory::SiteFactory;
pub use failover::FailoverRing;
pub use http::SiteContext;
pub use ratelimit::SiteLimiter;
pub use registry::SiteRegistry;
