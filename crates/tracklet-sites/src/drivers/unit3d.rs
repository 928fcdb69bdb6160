//! UNIT3D driver family: the `/api/torrents` JSON surface with Bearer
//! tokens. Download links are tokenised absolute URLs carried in the API
//! payload, surfaced to callers as the item's download token.

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
    Arc::new(Unit3dSite { context })
}

/// UNIT3D JSON driver.
pub struct Unit3dSite {
    context: SiteContext,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Listing {
    data: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Detail {
    data: Entry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Entry {
    id: Value,
    attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Attributes {
    name: String,
    description: Option<String>,
    info_hash: Option<String>,
    size: Value,
    seeders: Value,
    leechers: Value,
    times_completed: Value,
    freeleech: Option<String>,
    double_upload: bool,
    internal: bool,
    created_at: Option<String>,
    category: Option<String>,
    download_link: Option<String>,
    details_link: Option<String>,
}

impl Unit3dSite {
    fn to_item(&self, entry: Entry) -> TorrentItem {
        let tz = self.context.tz_offset();
        let attributes = entry.attributes;
        let id = match &entry.id {
            Value::String(id) if !id.is_empty() => id.clone(),
            other => value_u64(other).to_string(),
        };
        TorrentItem {
            url: attributes.details_link.clone(),
            id,
            title: attributes.name,
            subtitle: attributes.description,
            info_hash: attributes.info_hash,
            size_bytes: value_u64(&attributes.size),
            seeders: value_u32(&attributes.seeders),
            leechers: value_u32(&attributes.leechers),
            snatched: value_u32(&attributes.times_completed),
            discount: map_freeleech(attributes.freeleech.as_deref(), attributes.double_upload),
            discount_end_time: None,
            uploaded_at: attributes
                .created_at
                .as_deref()
                .and_then(|value| parse_time(value, tz)),
            category: attributes.category,
            source_site: self.context.site_id().to_string(),
            has_hr: attributes.internal,
            download_token: attributes.download_link,
        }
    }
}

fn map_freeleech(freeleech: Option<&str>, double_upload: bool) -> DiscountLevel {
    let percent = freeleech
        .map(|value| value.trim().trim_end_matches('%'))
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(0);
    match (percent, double_upload) {
        (100, true) => DiscountLevel::TwoXFree,
        (100, false) => DiscountLevel::Free,
        (50, true) => DiscountLevel::TwoXHalfDown,
        (50, false) => DiscountLevel::HalfDown,
        (30, _) => DiscountLevel::ThirtyDown,
        (_, true) => DiscountLevel::TwoXUp,
        _ => DiscountLevel::None,
    }
}

#[async_trait]
impl Site for Unit3dSite {
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
            path.push_str("&free=100");
        }
        if let Some(page) = request.page {
            path.push_str(&format!("&page={page}"));
        }
        if let Some(page_size) = request.page_size {
            path.push_str(&format!("&perPage={page_size}"));
        }

        let listing: Listing = self.context.get_json(&path).await?;
        let mut items: Vec<TorrentItem> = listing
            .data
            .into_iter()
            .map(|entry| self.to_item(entry))
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
        let detail: Detail = self.context.get_json(&path).await?;
        let item = self.to_item(detail.data);
        if item.title.is_empty() {
            return Err(SiteError::NotFound {
                site: self.context.site_id().to_string(),
                reference: id,
            });
        }
        Ok(item)
    }

    async fn user_info(&self) -> SiteResult<UserStats> {
        let path = self.context.definition().endpoints.user_info.clone();
        let payload: Value = self.context.get_json(&path).await?;
        let root = payload.get("data").unwrap_or(&payload);
        let attributes = root.get("attributes").unwrap_or(root);

        let field = |name: &str| attributes.get(name).cloned().unwrap_or(Value::Null);
        Ok(UserStats {
            username: field("username").as_str().map(str::to_string),
            uploaded_bytes: value_u64(&field("uploaded")),
            downloaded_bytes: value_u64(&field("downloaded")),
            ratio: value_f64(&field("ratio")),
            bonus: value_f64(&field("seedbonus")),
            level: field("group").as_str().map(str::to_string),
            join_date: field("created_at")
                .as_str()
                .and_then(|value| parse_time(value, self.context.tz_offset())),
            last_access: None,
            seeding: value_u32(&field("seeding")),
            leeching: value_u32(&field("leeching")),
        })
    }

    async fn download(&self, id: &str, hash_token: Option<&str>) -> SiteResult<Vec<u8>> {
        let link = match hash_token {
            Some(link) => link.to_string(),
            None => {
                let detail = self.detail(&TorrentRef::Id(id.to_string())).await?;
                detail.download_token.ok_or_else(|| SiteError::Parse {
                    site: self.context.site_id().to_string(),
                    what: "download link missing from api payload".to_string(),
                })?
            }
        };
        let bytes = self.context.get_bytes_absolute(&link).await?;
        ensure_torrent_payload(self.context.site_id(), &bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SiteDefinition, SiteSchema};
    use tracklet_core::SiteConfig;

    fn driver() -> Unit3dSite {
        let mut definition = SiteDefinition::new("rousi", SiteSchema::Rousi, "Rousi");
        definition.base_urls = vec!["https://rousi.example".to_string()];
        let context = SiteContext::new(
            Arc::new(definition),
            SiteConfig {
                site_id: "rousi".to_string(),
                enabled: true,
                api_key: Some("token".to_string()),
                ..SiteConfig::default()
            },
            None,
        )
        .expect("context");
        Unit3dSite { context }
    }

    #[test]
    fn freeleech_labels_combine_with_double_upload() {
        assert_eq!(map_freeleech(Some("100%"), false), DiscountLevel::Free);
        assert_eq!(map_freeleech(Some("100%"), true), DiscountLevel::TwoXFree);
        assert_eq!(map_freeleech(Some("50%"), false), DiscountLevel::HalfDown);
        assert_eq!(map_freeleech(Some("30%"), true), DiscountLevel::ThirtyDown);
        assert_eq!(map_freeleech(None, true), DiscountLevel::TwoXUp);
        assert_eq!(map_freeleech(Some("0%"), false), DiscountLevel::None);
    }

    #[test]
    fn listing_entries_become_items_with_download_tokens() {
        let driver = driver();
        let raw = serde_json::json!({
            "data": [{
                "id": "777",
                "attributes": {
                    "name": "Test.Movie.2025",
                    "size": 45634027520_u64,
                    "seeders": 12,
                    "leechers": 2,
                    "times_completed": 5,
                    "freeleech": "100%",
                    "double_upload": false,
                    "created_at": "2026-02-01 08:00:00",
                    "category": "Movies",
                    "download_link": "https://rousi.example/torrent/download/777.abcdef",
                    "details_link": "https://rousi.example/torrents/777"
                }
            }]
        });
        let listing: Listing = serde_json::from_value(raw).expect("decodes");
        let item = driver.to_item(listing.data.into_iter().next().expect("entry"));
        assert_eq!(item.id, "777");
        assert_eq!(item.discount, DiscountLevel::Free);
        assert_eq!(
            item.download_token.as_deref(),
            Some("https://rousi.example/torrent/download/777.abcdef")
        );
        assert_eq!(item.size_bytes, 45_634_027_520);
    }
}
