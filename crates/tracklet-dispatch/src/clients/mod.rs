//! Downloader client implementations and the kind-keyed factory.

pub mod qbittorrent;
pub mod transmission;

use std::sync::Arc;

use tracklet_core::{DownloaderClient, DownloaderError, DownloaderKind, DownloaderSetting};

/// Build a client for a downloader setting.
///
/// # Errors
///
/// Returns an error when the underlying HTTP client cannot be constructed.
pub fn build_client(
    setting: &DownloaderSetting,
) -> Result<Arc<dyn DownloaderClient>, DownloaderError> {
    match setting.kind {
        DownloaderKind::Qbittorrent => Ok(Arc::new(qbittorrent::QbitClient::new(setting)?)),
        DownloaderKind::Transmission => {
            Ok(Arc::new(transmission::TransmissionClient::new(setting)?))
        }
    }
}
