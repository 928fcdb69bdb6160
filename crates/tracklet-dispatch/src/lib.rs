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

//! Downloader dispatch: typed clients for qBittorrent and Transmission, a
//! factory keyed on the downloader kind, and the idempotent push service
//! with per-`(hash, downloader)` advisory locking.

pub mod clients;
pub mod hash;
pub mod service;

pub use clients::build_client;
pub use hash::compute_info_hash;
pub use service::{
    DispatchService, DownloaderPushResult, PushRequest, PushReport, PushResultKind,
};
