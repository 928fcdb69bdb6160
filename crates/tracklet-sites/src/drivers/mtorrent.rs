//! M-Team style token JSON API driver.
//!
//! Every call is a POST against the API with an `x-api-key` header; the
//! download endpoint returns a one-shot tokenised URL instead of the
//! payload itself.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracklet_core::{
    DiscountLevel, SearchRequest, Site, SiteError, SiteResult, TorrentItem, TorrentRef, UserStats,
};

use super::{ensure_torrent_payload, reference_id, value_f64, value_u32, value_u64};
use crate::http::SiteContext;
use crate::parse::parse_time;

/// Construct the driver; the registry's factory entry for this family.
#[must_use]
pub fn create(context: SiteContext) -> Arc<dyn Site> {
    Arc::new(MTorrentSite { context })
}

/// Token-API JSON driver.
pub struct MTorrentSite {
    context: SiteContext,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchData {
    data: Vec<ApiTorrent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiTorrent {
    id: Value,
    name: String,
    small_descr: Option<String>,
    size: Value,
    category: Value,
    created_date: Option<String>,
    status: Option<ApiStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiStatus {
    seeders: Value,
    leechers: Value,
    times_completed: Value,
    discount: Option<String>,
    discount_end_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Profile {
    username: Option<String>,
    created_date: Option<String>,
    role: Option<String>,
    member_count: Option<MemberCount>,
    member_status: Option<MemberStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MemberCount {
    uploaded: Value,
    downloaded: Value,
    share_rate: Value,
    bonus: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MemberStatus {
    last_login: Option<String>,
}

impl MTorrentSite {
    fn check<T>(&self, envelope: Envelope<T>) -> SiteResult<T> {
        let ok = match &envelope.code {
            Value::String(code) => code == "0",
            Value::Number(code) => code.as_i64() == Some(0),
            _ => false,
        };
        if !ok {
            let message = envelope.message.unwrap_or_else(|| "unknown".to_string());
            return Err(match message.to_ascii_lowercase() {
                m if m.contains("key") || m.contains("auth") => SiteError::InvalidCredentials {
                    site: self.context.site_id().to_string(),
                },
                _ => SiteError::Parse {
                    site: self.context.site_id().to_string(),
                    what: format!("api error: {message}"),
                },
            });
        }
        envelope.data.ok_or_else(|| SiteError::Parse {
            site: self.context.site_id().to_string(),
            what: "api payload missing data".to_string(),
        })
    }

    fn to_item(&self, torrent: ApiTorrent) -> TorrentItem {
        let tz = self.context.tz_offset();
        let status = torrent.status.unwrap_or_default();
        let id = match &torrent.id {
            Value::String(id) => id.clone(),
            other => value_u64(other).to_string(),
        };
        TorrentItem {
            url: Some(format!(
                "{}/detail/{id}",
                self.context.current_base()
            )),
            id,
            title: torrent.name,
            subtitle: torrent.small_descr,
            info_hash: None,
            size_bytes: value_u64(&torrent.size),
            seeders: value_u32(&status.seeders),
            leechers: value_u32(&status.leechers),
            snatched: value_u32(&status.times_completed),
            discount: map_discount(status.discount.as_deref()),
            discount_end_time: status
                .discount_end_time
                .as_deref()
                .and_then(|value| parse_time(value, tz)),
            uploaded_at: torrent
                .created_date
                .as_deref()
                .and_then(|value| parse_time(value, tz)),
            category: match &torrent.category {
                Value::String(category) => Some(category.clone()),
                Value::Number(category) => Some(category.to_string()),
                _ => None,
            },
            source_site: self.context.site_id().to_string(),
            has_hr: false,
            download_token: None,
        }
    }

    fn parse_user(&self, profile: Profile) -> UserStats {
        let tz = self.context.tz_offset();
        let count = profile.member_count.unwrap_or_default();
        UserStats {
            username: profile.username,
            uploaded_bytes: value_u64(&count.uploaded),
            downloaded_bytes: value_u64(&count.downloaded),
            ratio: value_f64(&count.share_rate),
            bonus: value_f64(&count.bonus),
            level: profile.role,
            join_date: profile
                .created_date
                .as_deref()
                .and_then(|value| parse_time(value, tz)),
            last_access: profile
                .member_status
                .and_then(|status| status.last_login)
                .as_deref()
                .and_then(|value| parse_time(value, tz)),
            seeding: 0,
            leeching: 0,
        }
    }
}

fn map_discount(label: Option<&str>) -> DiscountLevel {
    match label.unwrap_or("") {
        "FREE" => DiscountLevel::Free,
        "_2X_FREE" => DiscountLevel::TwoXFree,
        "_2X" => DiscountLevel::TwoXUp,
        "PERCENT_50" => DiscountLevel::HalfDown,
        "_2X_PERCENT_50" => DiscountLevel::TwoXHalfDown,
        "PERCENT_30" => DiscountLevel::ThirtyDown,
        _ => DiscountLevel::None,
    }
}

#[async_trait]
impl Site for MTorrentSite {
    fn id(&self) -> &str {
        self.context.site_id()
    }

    fn display_name(&self) -> &str {
        self.context.definition().display_name
    }

    async fn search(&self, request: &SearchRequest) -> SiteResult<Vec<TorrentItem>> {
        let body = json!({
            "keyword": request.keyword,
            "mode": "normal",
            "pageNumber": request.page.unwrap_or(1),
            "pageSize": request.page_size.unwrap_or(100),
        });
        let envelope: Envelope<SearchData> = self
            .context
            .post_json(&self.context.definition().endpoints.search.clone(), body)
            .await?;
        let data = self.check(envelope)?;

        let mut items: Vec<TorrentItem> =
            data.data.into_iter().map(|t| self.to_item(t)).collect();
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
        let envelope: Envelope<ApiTorrent> = self
            .context
            .post_json(
                &self.context.definition().endpoints.detail.clone(),
                json!({ "id": id }),
            )
            .await?;
        let torrent = self.check(envelope)?;
        Ok(self.to_item(torrent))
    }

    async fn user_info(&self) -> SiteResult<UserStats> {
        let envelope: Envelope<Profile> = self
            .context
            .post_json(
                &self.context.definition().endpoints.user_info.clone(),
                json!({}),
            )
            .await?;
        let profile = self.check(envelope)?;
        Ok(self.parse_user(profile))
    }

    async fn download(&self, id: &str, _hash_token: Option<&str>) -> SiteResult<Vec<u8>> {
        let envelope: Envelope<String> = self
            .context
            .post_json(
                &self.context.definition().endpoints.download.clone(),
                json!({ "id": id }),
            )
            .await?;
        let url = self.check(envelope)?;
        let bytes = self.context.get_bytes_absolute(&url).await?;
        ensure_torrent_payload(self.context.site_id(), &bytes)?;
        Ok(bytes)
    }
}
