//! Builtin site catalog.
//!
//! One function per site keeps diffs reviewable; [`register_all`] is the
//! single bootstrap entry point, called explicitly so nothing registers at
//! load time.

use std::time::Duration;

use tracklet_core::AuthMethod;

use crate::definition::{LevelRequirement, SelectorRule, SiteDefinition, SiteSchema};
use crate::parse::FilterStep;
use crate::registry::{RegistryError, SiteRegistry};

/// Register every builtin definition.
///
/// # Errors
///
/// Returns the first duplicate-id error; builtins are fixed so this only
/// fires when a new definition reuses an id.
pub fn register_all(registry: &mut SiteRegistry) -> Result<(), RegistryError> {
    registry.register(hdsky())?;
    registry.register(hddolby())?;
    registry.register(mteam())?;
    registry.register(dicmusic())?;
    registry.register(rousi())?;
    Ok(())
}

fn nexusphp_search_fields(definition: &mut SiteDefinition) {
    let fields = &mut definition.selectors.fields;
    fields.insert(
        "id".to_string(),
        SelectorRule::attr("a[href*='details.php']", "href")
            .with(FilterStep::QueryString("id".to_string())),
    );
    fields.insert(
        "title".to_string(),
        SelectorRule::attr("a[href*='details.php']", "title"),
    );
    fields.insert(
        "link".to_string(),
        SelectorRule::attr("a[href*='details.php']", "href"),
    );
    fields.insert(
        "size".to_string(),
        SelectorRule::text("td:nth-of-type(5)").with(FilterStep::ParseSize),
    );
    fields.insert(
        "seeders".to_string(),
        SelectorRule::text("td:nth-of-type(6)").with(FilterStep::ParseNumber),
    );
    fields.insert(
        "leechers".to_string(),
        SelectorRule::text("td:nth-of-type(7)").with(FilterStep::ParseNumber),
    );
    fields.insert(
        "snatched".to_string(),
        SelectorRule::text("td:nth-of-type(8)").with(FilterStep::ParseNumber),
    );
    fields.insert(
        "uploaded_at".to_string(),
        SelectorRule::attr("td:nth-of-type(4) span[title]", "title").with(FilterStep::ParseTime),
    );
    fields.insert(
        "category".to_string(),
        SelectorRule::attr("td:nth-of-type(1) img", "title"),
    );
    fields.insert(
        "discount_end".to_string(),
        SelectorRule::attr("td.embedded span[title]", "title").with(FilterStep::ParseTime),
    );
}

fn nexusphp_detail_fields(definition: &mut SiteDefinition) {
    let fields = &mut definition.selectors.detail_fields;
    fields.insert("title".to_string(), SelectorRule::text("h1#top"));
    fields.insert(
        "promotion".to_string(),
        SelectorRule::text("h1#top img[class*='pro_']"),
    );
    fields.insert(
        "discount_end".to_string(),
        SelectorRule::attr("h1#top span[title]", "title").with(FilterStep::ParseTime),
    );
    fields.insert(
        "size".to_string(),
        SelectorRule::text("td.rowfollow")
            .with(FilterStep::regex(r"([0-9.,]+\s*[KMGTP]i?B)"))
            .with(FilterStep::ParseSize),
    );
}

fn nexusphp_user_fields(definition: &mut SiteDefinition) {
    let fields = &mut definition.selectors.user_fields;
    fields.insert(
        "username".to_string(),
        SelectorRule::text("a[href*='userdetails.php'] b"),
    );
    fields.insert(
        "uploaded".to_string(),
        SelectorRule::text("td#outer")
            .with(FilterStep::regex(r"上[传傳]量?[:：]\s*([0-9.,]+\s*[KMGTP]i?B)"))
            .with(FilterStep::ParseSize),
    );
    fields.insert(
        "downloaded".to_string(),
        SelectorRule::text("td#outer")
            .with(FilterStep::regex(r"下[载載]量?[:：]\s*([0-9.,]+\s*[KMGTP]i?B)"))
            .with(FilterStep::ParseSize),
    );
    fields.insert(
        "bonus".to_string(),
        SelectorRule::text("td#outer").with(FilterStep::regex(r"魔力值?[:：]\s*([0-9.,]+)")),
    );
    fields.insert(
        "level".to_string(),
        SelectorRule::attr("img[class*='class']", "title"),
    );
    fields.insert(
        "join_date".to_string(),
        SelectorRule::attr("td#outer span[title]", "title").with(FilterStep::ParseTime),
    );
}

fn hdsky() -> SiteDefinition {
    let mut definition = SiteDefinition::new("hdsky", SiteSchema::NexusPhp, "HDSky");
    definition.base_urls = vec!["https://hdsky.me".to_string()];
    definition.auth_method = AuthMethod::Cookie;
    definition.rate.window = Some(Duration::from_secs(3600));
    definition.rate.window_limit = Some(100);
    definition.endpoints.search = "torrents.php?incldead=1&search={}".to_string();
    definition.endpoints.detail = "details.php?id={}&hit=1".to_string();
    definition.endpoints.download = "download.php?id={}".to_string();
    definition.endpoints.user_info = "userdetails.php".to_string();
    definition.selectors.rows = "table.torrents > tbody > tr".to_string();
    definition.selectors.hr_marker = Some("img[src*='hit_run.gif']".to_string());
    nexusphp_search_fields(&mut definition);
    nexusphp_detail_fields(&mut definition);
    nexusphp_user_fields(&mut definition);
    definition.level_requirements = vec![
        LevelRequirement {
            level: "Power User".to_string(),
            uploaded_bytes: 200 * (1 << 30),
            ratio: 2.0,
            weeks: 5,
        },
        LevelRequirement {
            level: "Elite User".to_string(),
            uploaded_bytes: 500 * (1 << 30),
            ratio: 2.5,
            weeks: 10,
        },
    ];
    definition
}

fn hddolby() -> SiteDefinition {
    let mut definition = SiteDefinition::new("hddolby", SiteSchema::HdDolby, "HD Dolby");
    definition.base_urls = vec!["https://www.hddolby.com".to_string()];
    definition.auth_method = AuthMethod::CookieAndApiKey;
    definition.rate.per_second = 1.0;
    definition.rate.burst = 3;
    definition.endpoints.search = "torrents.php?incldead=1&search={}".to_string();
    definition.endpoints.detail = "details.php?id={}".to_string();
    definition.endpoints.download = "download.php?id={}".to_string();
    definition.endpoints.user_info = "userdetails.php".to_string();
    definition.selectors.rows = "table.torrents > tbody > tr".to_string();
    nexusphp_search_fields(&mut definition);
    nexusphp_detail_fields(&mut definition);
    nexusphp_user_fields(&mut definition);
    // Dolby renders its promotion badges with non-standard class names.
    definition.selectors.promotion_classes = [
        ("pro_free".to_string(), tracklet_core::DiscountLevel::Free),
        (
            "pro_free2xup".to_string(),
            tracklet_core::DiscountLevel::TwoXFree,
        ),
    ]
    .into_iter()
    .collect();
    definition
}

fn mteam() -> SiteDefinition {
    let mut definition = SiteDefinition::new("mteam", SiteSchema::MTorrent, "M-Team");
    definition.base_urls = vec![
        "https://api.m-team.cc".to_string(),
        "https://api.m-team.io".to_string(),
    ];
    definition.legacy_urls = vec!["https://kp.m-team.cc".to_string()];
    definition.auth_method = AuthMethod::ApiKey;
    definition.rate.per_second = 0.5;
    definition.rate.burst = 2;
    definition.rate.window = Some(Duration::from_secs(3600));
    definition.rate.window_limit = Some(50);
    definition.timezone_offset_hours = 8;
    definition.endpoints.search = "api/torrent/search".to_string();
    definition.endpoints.detail = "api/torrent/detail".to_string();
    definition.endpoints.download = "api/torrent/genDlToken".to_string();
    definition.endpoints.user_info = "api/member/profile".to_string();
    definition
}

fn dicmusic() -> SiteDefinition {
    let mut definition = SiteDefinition::new("dicmusic", SiteSchema::Gazelle, "DIC Music");
    definition.base_urls = vec!["https://dicmusic.com".to_string()];
    definition.auth_method = AuthMethod::Cookie;
    definition.rate.per_second = 0.5;
    definition.rate.burst = 5;
    definition.endpoints.search = "ajax.php?action=browse&searchstr={}".to_string();
    definition.endpoints.detail = "ajax.php?action=torrent&id={}".to_string();
    definition.endpoints.download = "torrents.php?action=download&id={}".to_string();
    definition.endpoints.user_info = "ajax.php?action=index".to_string();
    definition
}

fn rousi() -> SiteDefinition {
    let mut definition = SiteDefinition::new("rousi", SiteSchema::Rousi, "Rousi");
    definition.base_urls = vec!["https://rousi.zip".to_string()];
    definition.auth_method = AuthMethod::ApiKey;
    definition.endpoints.search = "api/torrents/filter?name={}".to_string();
    definition.endpoints.detail = "api/torrents/{}".to_string();
    definition.endpoints.download = "api/torrents/download/{}".to_string();
    definition.endpoints.user_info = "api/users/me".to_string();
    definition
}
