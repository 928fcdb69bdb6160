//! Driver families. Each module exposes a `create` constructor matching
//! [`crate::definition::DriverFactory`]; the registry resolves a
//! definition's schema to one of them unless the definition supplies its
//! own constructor.

pub mod gazelle;
pub mod mtorrent;
pub mod nexusphp;
pub mod unit3d;

use tracklet_core::{SiteError, TorrentRef};

use crate::parse::query_param;

/// Resolve a detail reference to a site-local id: ids and guids pass
/// through, links have their `id` query parameter extracted.
pub(crate) fn reference_id(site: &str, reference: &TorrentRef) -> Result<String, SiteError> {
    match reference {
        TorrentRef::Id(id) | TorrentRef::Guid(id) => {
            // Feeds sometimes put the detail link into the guid.
            if id.contains("://") || id.contains('?') {
                return link_id(site, id);
            }
            Ok(id.clone())
        }
        TorrentRef::Link(link) => link_id(site, link),
    }
}

fn link_id(site: &str, link: &str) -> Result<String, SiteError> {
    query_param(link, "id")
        .or_else(|| {
            // UNIT3D-style path ids: .../torrents/12345
            link.trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|tail| !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()))
                .map(str::to_string)
        })
        .ok_or_else(|| SiteError::Parse {
            site: site.to_string(),
            what: format!("torrent id from link '{link}'"),
        })
}

/// JSON APIs disagree on whether counters are numbers or strings; read
/// either.
pub(crate) fn value_u64(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(number) => number.as_u64().unwrap_or(0),
        serde_json::Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn value_u32(value: &serde_json::Value) -> u32 {
    u32::try_from(value_u64(value)).unwrap_or(u32::MAX)
}

pub(crate) fn value_f64(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(number) => number.as_f64().unwrap_or(0.0),
        serde_json::Value::String(text) => text.trim().replace(',', "").parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Reject payloads that are clearly not bencoded metainfo (sites answer
/// HTML error pages with HTTP 200 more often than one would hope).
pub(crate) fn ensure_torrent_payload(site: &str, bytes: &[u8]) -> Result<(), SiteError> {
    if bytes.first() == Some(&b'd') {
        Ok(())
    } else {
        Err(SiteError::Parse {
            site: site.to_string(),
            what: "torrent payload (response is not bencoded)".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_ids_resolve_from_every_shape() {
        let id = reference_id("hdsky", &TorrentRef::Id("164895".to_string())).unwrap();
        assert_eq!(id, "164895");

        let link = TorrentRef::Link("https://hdsky.me/details.php?id=164895&hit=1".to_string());
        assert_eq!(reference_id("hdsky", &link).unwrap(), "164895");

        let guid = TorrentRef::Guid("https://unit3d.example/torrents/777".to_string());
        assert_eq!(reference_id("unit3d", &guid).unwrap(), "777");

        let opaque = TorrentRef::Link("https://hdsky.me/about".to_string());
        assert!(reference_id("hdsky", &opaque).is_err());
    }

    #[test]
    fn torrent_payload_probe_rejects_html() {
        assert!(ensure_torrent_payload("hdsky", b"d8:announce...").is_ok());
        assert!(ensure_torrent_payload("hdsky", b"<html>login required</html>").is_err());
        assert!(ensure_torrent_payload("hdsky", b"").is_err());
    }
}
