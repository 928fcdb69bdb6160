//! NexusPHP driver family: selector-driven HTML scraping.
//!
//! The driver itself knows nothing about any particular site; every
//! selector, filter pipeline and promotion-class override comes from the
//! definition. Parsing is synchronous and never holds a parsed document
//! across an await point.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use tracing::debug;
use tracklet_core::{
    DiscountLevel, SearchRequest, Site, SiteError, SiteResult, TorrentItem, TorrentRef, UserStats,
};

use super::{ensure_torrent_payload, reference_id};
use crate::definition::SelectorRule;
use crate::http::SiteContext;
use crate::parse::selector::{classes_of, document_has, extract, select_all};
use crate::parse::{discount_from_classes, parse_time};

/// Fallback selector for the promotion badge when a definition names none.
const DEFAULT_PROMOTION_SELECTOR: &str = "img[class*='pro_']";

/// Fallback marker for Hit-and-Run badges on detail pages.
const DEFAULT_HR_MARKER: &str = "img[src*='hit_run.gif']";

/// Construct the driver; the registry's factory entry for this family.
#[must_use]
pub fn create(context: SiteContext) -> Arc<dyn Site> {
    Arc::new(NexusPhpSite { context })
}

/// Selector-driven HTML driver.
pub struct NexusPhpSite {
    context: SiteContext,
}

impl NexusPhpSite {
    fn tz(&self) -> i8 {
        self.context.tz_offset()
    }

    fn field(&self, scope: ElementRef<'_>, name: &str) -> Option<String> {
        let rule = self.context.definition().selectors.fields.get(name)?;
        extract(scope, rule, self.tz())
    }

    fn detail_field(&self, scope: ElementRef<'_>, name: &str) -> Option<String> {
        let rule = self.context.definition().selectors.detail_fields.get(name)?;
        extract(scope, rule, self.tz())
    }

    fn user_field(&self, scope: ElementRef<'_>, name: &str) -> Option<String> {
        let rule = self.context.definition().selectors.user_fields.get(name)?;
        extract(scope, rule, self.tz())
    }

    fn promotion(&self, scope: ElementRef<'_>, rule: Option<&SelectorRule>) -> DiscountLevel {
        let selectors = &self.context.definition().selectors;
        let badge_selector =
            rule.map_or(DEFAULT_PROMOTION_SELECTOR, |rule| rule.selector.as_str());
        let classes = classes_of(scope, badge_selector);
        discount_from_classes(
            classes.iter().map(String::as_str),
            &selectors.promotion_classes,
        )
    }

    fn absolutise(&self, href: &str) -> String {
        if href.contains("://") {
            href.to_string()
        } else {
            format!(
                "{}/{}",
                self.context.current_base(),
                href.trim_start_matches('/')
            )
        }
    }

    fn item_from_row(&self, row: ElementRef<'_>) -> Option<TorrentItem> {
        let id = self.field(row, "id")?;
        let title = self.field(row, "title")?;

        let discount = self.promotion(
            row,
            self.context.definition().selectors.fields.get("promotion"),
        );
        let discount_end_time = self
            .field(row, "discount_end")
            .and_then(|value| self.to_time(&value));

        Some(TorrentItem {
            id,
            url: self.field(row, "link").map(|href| self.absolutise(&href)),
            title,
            subtitle: self.field(row, "subtitle"),
            info_hash: None,
            size_bytes: to_u64(self.field(row, "size")),
            seeders: to_u32(self.field(row, "seeders")),
            leechers: to_u32(self.field(row, "leechers")),
            snatched: to_u32(self.field(row, "snatched")),
            discount,
            discount_end_time,
            uploaded_at: self
                .field(row, "uploaded_at")
                .and_then(|value| self.to_time(&value)),
            category: self.field(row, "category"),
            source_site: self.context.site_id().to_string(),
            has_hr: false,
            download_token: None,
        })
    }

    fn parse_search(&self, html: &str) -> Vec<TorrentItem> {
        let document = Html::parse_document(html);
        let rows_selector = &self.context.definition().selectors.rows;
        let mut items = Vec::new();
        for row in select_all(&document, rows_selector) {
            match self.item_from_row(row) {
                Some(item) => items.push(item),
                None => {
                    debug!(site = %self.context.site_id(), "skipping result row with missing id/title");
                }
            }
        }
        items
    }

    fn parse_detail(&self, html: &str, id: &str) -> SiteResult<TorrentItem> {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let title = self
            .detail_field(root, "title")
            .ok_or_else(|| SiteError::Parse {
                site: self.context.site_id().to_string(),
                what: "detail title".to_string(),
            })?;

        let selectors = &self.context.definition().selectors;
        let hr_marker = selectors
            .hr_marker
            .as_deref()
            .unwrap_or(DEFAULT_HR_MARKER);

        Ok(TorrentItem {
            id: id.to_string(),
            url: Some(self.absolutise(&self.context.resolve_path(
                &self.context.definition().endpoints.detail,
                id,
            ))),
            title,
            subtitle: self.detail_field(root, "subtitle"),
            info_hash: self.detail_field(root, "info_hash"),
            size_bytes: to_u64(self.detail_field(root, "size")),
            seeders: to_u32(self.detail_field(root, "seeders")),
            leechers: to_u32(self.detail_field(root, "leechers")),
            snatched: to_u32(self.detail_field(root, "snatched")),
            discount: self.promotion(
                root,
                self.context
                    .definition()
                    .selectors
                    .detail_fields
                    .get("promotion"),
            ),
            discount_end_time: self
                .detail_field(root, "discount_end")
                .and_then(|value| self.to_time(&value)),
            uploaded_at: self
                .detail_field(root, "uploaded_at")
                .and_then(|value| self.to_time(&value)),
            category: self.detail_field(root, "category"),
            source_site: self.context.site_id().to_string(),
            has_hr: document_has(&document, hr_marker),
            download_token: self.detail_field(root, "download_token"),
        })
    }

    fn parse_user(&self, html: &str) -> UserStats {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let uploaded = to_u64(self.user_field(root, "uploaded"));
        let downloaded = to_u64(self.user_field(root, "downloaded"));
        let ratio = self
            .user_field(root, "ratio")
            .and_then(|value| value.replace(',', "").parse::<f64>().ok())
            .unwrap_or(if downloaded == 0 {
                0.0
            } else {
                uploaded_ratio(uploaded, downloaded)
            });

        UserStats {
            username: self.user_field(root, "username"),
            uploaded_bytes: uploaded,
            downloaded_bytes: downloaded,
            ratio,
            bonus: self
                .user_field(root, "bonus")
                .and_then(|value| value.replace(',', "").parse().ok())
                .unwrap_or(0.0),
            level: self.user_field(root, "level"),
            join_date: self
                .user_field(root, "join_date")
                .and_then(|value| self.to_time(&value)),
            last_access: self
                .user_field(root, "last_access")
                .and_then(|value| self.to_time(&value)),
            seeding: to_u32(self.user_field(root, "seeding")),
            leeching: to_u32(self.user_field(root, "leeching")),
        }
    }

    fn to_time(&self, value: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|parsed| parsed.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_time(value, self.tz()))
    }
}

fn to_u64(value: Option<String>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn to_u32(value: Option<String>) -> u32 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[allow(clippy::cast_precision_loss)]
fn uploaded_ratio(uploaded: u64, downloaded: u64) -> f64 {
    uploaded as f64 / downloaded as f64
}

#[async_trait]
impl Site for NexusPhpSite {
    fn id(&self) -> &str {
        self.context.site_id()
    }

    fn display_name(&self) -> &str {
        self.context.definition().display_name
    }

    async fn search(&self, request: &SearchRequest) -> SiteResult<Vec<TorrentItem>> {
        let definition = self.context.definition();
        let mut path = self
            .context
            .resolve_path(&definition.endpoints.search, &request.keyword);
        if let Some(category) = &request.category {
            path.push_str(&format!("&cat={}", urlencoding::encode(category)));
        }
        if request.free_only {
            path.push_str("&spstate=2");
        }
        if let Some(page) = request.page {
            if page > 1 {
                path.push_str(&format!("&page={}", page - 1));
            }
        }

        let html = self.context.get_text(&path).await?;
        let mut items = self.parse_search(&html);
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
        let html = self.context.get_text(&path).await?;
        self.parse_detail(&html, &id)
    }

    async fn user_info(&self) -> SiteResult<UserStats> {
        let path = self.context.definition().endpoints.user_info.clone();
        let html = self.context.get_text(&path).await?;
        Ok(self.parse_user(&html))
    }

    async fn download(&self, id: &str, hash_token: Option<&str>) -> SiteResult<Vec<u8>> {
        let mut path = self
            .context
            .resolve_path(&self.context.definition().endpoints.download, id);
        if let Some(token) = hash_token {
            path.push_str(&format!("&hash={}", urlencoding::encode(token)));
        }
        if let Some(passkey) = &self.context.config().passkey {
            path.push_str(&format!("&passkey={}", urlencoding::encode(passkey)));
        }
        let bytes = self.context.get_bytes(&path).await?;
        ensure_torrent_payload(self.context.site_id(), &bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SiteDefinition, SiteSchema};
    use crate::parse::FilterStep;
    use tracklet_core::SiteConfig;

    fn test_definition() -> SiteDefinition {
        let mut definition = SiteDefinition::new("hdsky", SiteSchema::NexusPhp, "HDSky");
        definition.base_urls = vec!["https://hdsky.me".to_string()];
        definition.endpoints.search = "torrents.php?search={}".to_string();
        definition.endpoints.detail = "details.php?id={}".to_string();
        definition.endpoints.download = "download.php?id={}".to_string();
        definition.endpoints.user_info = "userdetails.php".to_string();

        let selectors = &mut definition.selectors;
        selectors.rows = "table.torrents tr.torrent".to_string();
        selectors.fields.insert(
            "id".to_string(),
            SelectorRule::attr("a.torrent-link", "href")
                .with(FilterStep::QueryString("id".to_string())),
        );
        selectors.fields.insert(
            "title".to_string(),
            SelectorRule::attr("a.torrent-link", "title"),
        );
        selectors
            .fields
            .insert("link".to_string(), SelectorRule::attr("a.torrent-link", "href"));
        selectors.fields.insert(
            "size".to_string(),
            SelectorRule::text("td.size").with(FilterStep::ParseSize),
        );
        selectors.fields.insert(
            "seeders".to_string(),
            SelectorRule::text("td.seeders").with(FilterStep::ParseNumber),
        );
        selectors.fields.insert(
            "discount_end".to_string(),
            SelectorRule::attr("span.free-until", "title").with(FilterStep::ParseTime),
        );
        selectors.detail_fields.insert(
            "title".to_string(),
            SelectorRule::text("h1#top"),
        );
        selectors.detail_fields.insert(
            "size".to_string(),
            SelectorRule::text("td.detail-size").with(FilterStep::ParseSize),
        );
        selectors.detail_fields.insert(
            "discount_end".to_string(),
            SelectorRule::attr("span.free-until", "title").with(FilterStep::ParseTime),
        );
        selectors.user_fields.insert(
            "uploaded".to_string(),
            SelectorRule::text("td.uploaded").with(FilterStep::ParseSize),
        );
        selectors.user_fields.insert(
            "downloaded".to_string(),
            SelectorRule::text("td.downloaded").with(FilterStep::ParseSize),
        );
        selectors
            .user_fields
            .insert("level".to_string(), SelectorRule::text("span.userclass"));
        definition
    }

    fn driver() -> NexusPhpSite {
        let context = SiteContext::new(
            Arc::new(test_definition()),
            SiteConfig {
                site_id: "hdsky".to_string(),
                enabled: true,
                cookie: Some("uid=1".to_string()),
                ..SiteConfig::default()
            },
            None,
        )
        .expect("context");
        NexusPhpSite { context }
    }

    const SEARCH_PAGE: &str = r#"
        <table class="torrents">
          <tr class="torrent">
            <td><a class="torrent-link" href="details.php?id=164895" title="Test.Movie.2025">Test.Movie.2025</a>
                <img class="pro_free" alt="Free" />
                <span class="free-until" title="2026-03-01 12:00:00">3d</span></td>
            <td class="size">42.5 GiB</td>
            <td class="seeders">87</td>
          </tr>
          <tr class="torrent">
            <td><a class="torrent-link" href="details.php?id=164896" title="Other.Show.S01">Other.Show.S01</a></td>
            <td class="size">10 GiB</td>
            <td class="seeders">3</td>
          </tr>
          <tr class="torrent">
            <td><a class="broken" href="nowhere">unparsable row</a></td>
          </tr>
        </table>
    "#;

    #[test]
    fn search_page_rows_become_items() {
        let driver = driver();
        let items = driver.parse_search(SEARCH_PAGE);
        assert_eq!(items.len(), 2, "the unparsable row is skipped");

        let first = &items[0];
        assert_eq!(first.id, "164895");
        assert_eq!(first.title, "Test.Movie.2025");
        assert_eq!(first.size_bytes, 45_634_027_520);
        assert_eq!(first.seeders, 87);
        assert_eq!(first.discount, DiscountLevel::Free);
        let end = first.discount_end_time.expect("end time parsed");
        assert_eq!(end.to_rfc3339(), "2026-03-01T04:00:00+00:00");
        assert_eq!(
            first.url.as_deref(),
            Some("https://hdsky.me/details.php?id=164895")
        );

        let second = &items[1];
        assert_eq!(second.discount, DiscountLevel::None);
        assert!(second.discount_end_time.is_none());
    }

    const DETAIL_PAGE: &str = r#"
        <h1 id="top">Test.Movie.2025 <img class="pro_free2up" /></h1>
        <span class="free-until" title="2026-03-01 12:00:00">3d</span>
        <table><tr><td class="detail-size">42.5 GiB</td></tr></table>
        <img src="pic/hit_run.gif" />
    "#;

    #[test]
    fn detail_page_maps_promotion_and_hr() {
        let driver = driver();
        let item = driver.parse_detail(DETAIL_PAGE, "164895").expect("parses");
        assert_eq!(item.discount, DiscountLevel::TwoXFree);
        assert!(item.has_hr);
        assert_eq!(item.size_bytes, 45_634_027_520);
    }

    #[test]
    fn detail_without_title_is_a_parse_error() {
        let driver = driver();
        let err = driver
            .parse_detail("<html><body>nothing here</body></html>", "1")
            .expect_err("no title");
        assert!(matches!(err, SiteError::Parse { .. }));
    }

    #[test]
    fn user_page_fills_stats_and_derives_ratio() {
        let driver = driver();
        let html = r#"
            <table><tr>
              <td class="uploaded">2 TiB</td>
              <td class="downloaded">1 TiB</td>
            </tr></table>
            <span class="userclass">Power User</span>
        "#;
        let stats = driver.parse_user(html);
        assert_eq!(stats.uploaded_bytes, 2 * (1_u64 << 40));
        assert_eq!(stats.downloaded_bytes, 1 << 40);
        assert!((stats.ratio - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.level.as_deref(), Some("Power User"));
    }
}
