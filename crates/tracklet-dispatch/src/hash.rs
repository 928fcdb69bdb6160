//! Info-hash computation from bencoded metainfo.

use lava_torrent::torrent::v1::Torrent;
use tracklet_core::DownloaderError;

/// Compute the v1 info-hash (lowercase hex) of a `.torrent` payload.
///
/// # Errors
///
/// Returns a protocol error when the payload is not valid metainfo.
pub fn compute_info_hash(bytes: &[u8]) -> Result<String, DownloaderError> {
    let torrent = Torrent::read_from_bytes(bytes).map_err(|error| DownloaderError::Protocol {
        name: "dispatch".to_string(),
        message: format!("invalid torrent payload: {error}"),
    })?;
    Ok(torrent.info_hash().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklet_test_support::sample_torrent_bytes;

    #[test]
    fn info_hash_is_deterministic_hex() {
        let bytes = sample_torrent_bytes("Test.Movie.2025");
        let first = compute_info_hash(&bytes).expect("hashes");
        let second = compute_info_hash(&bytes).expect("hashes again");
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

        let other = compute_info_hash(&sample_torrent_bytes("Other.Name")).expect("hashes");
        assert_ne!(first, other, "the name lives inside the info dict");
    }

    #[test]
    fn garbage_is_rejected() {
        let err = compute_info_hash(b"<html>not a torrent</html>").expect_err("rejected");
        assert!(err.to_string().contains("invalid torrent payload"));
    }
}
