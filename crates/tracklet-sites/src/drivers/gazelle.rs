//! Gazelle driver family: the `ajax.php` JSON surface with cookie auth.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracklet_core::{
    DiscountLevel, SearchRequest, Site, SiteError, SiteResult, TorrentItem, TorrentRef, UserStats,
};

use super::{ensure_torrent_payload, reference_id, value_f64, value_u32, value_u64};
use crate::http::SiteContext;
use crate::parse::parse_time;

/// Construct the driver; the registry's factory entry for this family.
#[must_use]
pub fn create(context: SiteContext) -> Arc<dyn Site> {
    Arc::new(GazelleSite { context })
}

/// `ajax.php` JSON driver.
pub struct GazelleSite {
    context: SiteContext,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
    response: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BrowseResponse {
    results: Vec<BrowseGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BrowseGroup {
    group_id: Value,
    group_name: String,
    group_year: Value,
    torrent_id: Value,
    size: Value,
    seeders: Value,
    leechers: Value,
    snatches: Value,
    is_freeleech: bool,
    is_personal_freeleech: bool,
    group_time: Option<String>,
    category: Option<String>,
    torrents: Option<Vec<GroupTorrent>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GroupTorrent {
    torrent_id: Value,
    size: Value,
    seeders: Value,
    leechers: Value,
    snatches: Value,
    is_freeleech: bool,
    is_personal_freeleech: bool,
    time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IndexResponse {
    username: Option<String>,
    userstats: Option<IndexStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IndexStats {
    uploaded: Value,
    downloaded: Value,
    ratio: Value,
    class: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DetailResponse {
    torrent: Option<GroupTorrent>,
    group: Option<BrowseGroup>,
}

impl GazelleSite {
    fn check<T>(&self, envelope: Envelope<T>) -> SiteResult<T> {
        if envelope.status != "success" {
            let message = envelope.error.unwrap_or_else(|| envelope.status.clone());
            return Err(SiteError::Parse {
                site: self.context.site_id().to_string(),
                what: format!("ajax error: {message}"),
            });
        }
        envelope.response.ok_or_else(|| SiteError::Parse {
            site: self.context.site_id().to_string(),
            what: "ajax payload missing response".to_string(),
        })
    }

    fn freeleech_level(freeleech: bool, personal: bool) -> DiscountLevel {
        if freeleech || personal {
            DiscountLevel::Free
        } else {
            DiscountLevel::None
        }
    }

    fn group_items(&self, group: BrowseGroup) -> Vec<TorrentItem> {
        let tz = self.context.tz_offset();
        let base = self.context.current_base();
        let title = if value_u64(&group.group_year) > 0 {
            format!("{} ({})", group.group_name, value_u64(&group.group_year))
        } else {
            group.group_name.clone()
        };

        let from_parts = |torrent_id: String,
                          size: u64,
                          seeders: u32,
                          leechers: u32,
                          snatched: u32,
                          discount: DiscountLevel,
                          time: Option<&str>| TorrentItem {
            url: Some(format!("{base}/torrents.php?torrentid={torrent_id}")),
            id: torrent_id,
            title: title.clone(),
            subtitle: None,
            info_hash: None,
            size_bytes: size,
            seeders,
            leechers,
            snatched,
            discount,
            discount_end_time: None,
            uploaded_at: time.and_then(|value| parse_time(value, tz)),
            category: group.category.clone(),
            source_site: self.context.site_id().to_string(),
            has_hr: false,
            download_token: None,
        };

        match group.torrents {
            Some(torrents) => torrents
                .into_iter()
                .map(|torrent| {
                    from_parts(
                        value_u64(&torrent.torrent_id).to_string(),
                        value_u64(&torrent.size),
                        value_u32(&torrent.seeders),
                        value_u32(&torrent.leechers),
                        value_u32(&torrent.snatches),
                        Self::freeleech_level(
                            torrent.is_freeleech,
                            torrent.is_personal_freeleech,
                        ),
                        torrent.time.as_deref(),
                    )
                })
                .collect(),
            None => vec![from_parts(
                value_u64(&group.torrent_id).to_string(),
                value_u64(&group.size),
                value_u32(&group.seeders),
                value_u32(&group.leechers),
                value_u32(&group.snatches),
                Self::freeleech_level(group.is_freeleech, group.is_personal_freeleech),
                group.group_time.as_deref(),
            )],
        }
    }
}

#[async_trait]
impl Site for GazelleSite {
    fn id(&self) -> &str {
        self.context.site_id()
    }

    fn display_name(&self) -> &str {
        self.context.definition().display_name
    }

    async fn search(&self, request: &SearchRequest) -> SiteResult<Vec<TorrentItem>> {
        let mut path = self
            .context
            .resolve_path(&self.context.definition().endpoints.search, &request.keyword);
        if request.free_only {
            path.push_str("&freetorrent=1");
        }
        if let Some(page) = request.page {
            path.push_str(&format!("&page={page}"));
        }

        let envelope: Envelope<BrowseResponse> = self.context.get_json(&path).await?;
        let response = self.check(envelope)?;

        let mut items: Vec<TorrentItem> = response
            .results
            .into_iter()
            .flat_map(|group| self.group_items(group))
            .collect();
        items.retain(|item| {
            request.min_seeders.is_none_or(|min| item.seeders >= min)
                && request.min_size_bytes.is_none_or(|min| item.size_bytes >= min)
                && request.max_size_bytes.is_none_or(|max| item.size_bytes <= max)
                && (!request.free_only || item.discount.is_free())
        });
        Ok(items)
    }

    async fn detail(&self, reference: &TorrentRef) -> SiteResult<TorrentItem> {
        let id = reference_id(self.context.site_id(), reference)?;
        let path = self
            .context
            .resolve_path(&self.context.definition().endpoints.detail, &id);
        let envelope: Envelope<DetailResponse> = self.context.get_json(&path).await?;
        let response = self.check(envelope)?;

        let torrent = response.torrent.unwrap_or_default();
        let group = response.group.unwrap_or_default();
        Ok(TorrentItem {
            id: id.clone(),
            url: Some(format!(
                "{}/torrents.php?torrentid={id}",
                self.context.current_base()
            )),
            title: group.group_name,
            subtitle: None,
            info_hash: None,
            size_bytes: value_u64(&torrent.size),
            seeders: value_u32(&torrent.seeders),
            leechers: value_u32(&torrent.leechers),
            snatched: value_u32(&torrent.snatches),
            discount: Self::freeleech_level(torrent.is_freeleech, torrent.is_personal_freeleech),
            discount_end_time: None,
            uploaded_at: torrent
                .time
                .as_deref()
                .and_then(|value| parse_time(value, self.context.tz_offset())),
            category: group.category,
            source_site: self.context.site_id().to_string(),
            has_hr: false,
            download_token: None,
        })
    }

    async fn user_info(&self) -> SiteResult<UserStats> {
        let path = self.context.definition().endpoints.user_info.clone();
        let envelope: Envelope<IndexResponse> = self.context.get_json(&path).await?;
        let response = self.check(envelope)?;
        let stats = response.userstats.unwrap_or_default();
        Ok(UserStats {
            username: response.username,
            uploaded_bytes: value_u64(&stats.uploaded),
            downloaded_bytes: value_u64(&stats.downloaded),
            ratio: value_f64(&stats.ratio),
            bonus: 0.0,
            level: stats.class,
            join_date: None,
            last_access: None,
            seeding: 0,
            leeching: 0,
        })
    }

    async fn download(&self, id: &str, _hash_token: Option<&str>) -> SiteResult<Vec<u8>> {
        let path = self
            .context
            .resolve_path(&self.context.definition().endpoints.download, id);
        let bytes = self.context.get_bytes(&path).await?;
        ensure_torrent_payload(self.context.site_id(), &bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SiteDefinition, SiteSchema};
    use tracklet_core::SiteConfig;

    fn driver() -> GazelleSite {
        let mut definition = SiteDefinition::new("redoak", SiteSchema::Gazelle, "Red Oak");
        definition.base_urls = vec!["https://redoak.example".to_string()];
        let context = SiteContext::new(
            Arc::new(definition),
            SiteConfig {
                site_id: "redoak".to_string(),
                enabled: true,
                cookie: Some("session=x".to_string()),
                ..SiteConfig::default()
            },
            None,
        )
        .expect("context");
        GazelleSite { context }
    }

    #[test]
    fn grouped_results_flatten_into_items() {
        let driver = driver();
        let raw = serde_json::json!({
            "status": "success",
            "response": {
                "results": [{
                    "groupId": 100,
                    "groupName": "Some Album",
                    "groupYear": 2020,
                    "category": "Music",
                    "torrents": [
                        { "torrentId": 555, "size": 1048576, "seeders": 10,
                          "leechers": 1, "snatches": 3, "isFreeleech": true,
                          "time": "2026-02-01 08:00:00" },
                        { "torrentId": 556, "size": 2097152, "seeders": 4,
                          "leechers": 0, "snatches": 1, "isFreeleech": false }
                    ]
                }, {
                    "groupId": 101,
                    "groupName": "Flat Result",
                    "torrentId": 900,
                    "size": 4096,
                    "seeders": 2,
                    "leechers": 0,
                    "snatches": 0,
                    "isFreeleech": false
                }]
            }
        });
        let envelope: Envelope<BrowseResponse> = serde_json::from_value(raw).expect("decodes");
        let response = driver.check(envelope).expect("status ok");
        let items: Vec<TorrentItem> = response
            .results
            .into_iter()
            .flat_map(|group| driver.group_items(group))
            .collect();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "555");
        assert_eq!(items[0].title, "Some Album (2020)");
        assert_eq!(items[0].discount, DiscountLevel::Free);
        assert_eq!(items[1].discount, DiscountLevel::None);
        assert_eq!(items[2].id, "900");
        assert_eq!(items[2].title, "Flat Result");
    }

    #[test]
    fn failed_status_surfaces_the_error() {
        let driver = driver();
        let raw = serde_json::json!({ "status": "failure", "error": "bad parameters" });
        let envelope: Envelope<BrowseResponse> = serde_json::from_value(raw).expect("decodes");
        let err = driver.check(envelope).expect_err("failure status");
        assert!(err.to_string().contains("bad parameters"));
    }
}
