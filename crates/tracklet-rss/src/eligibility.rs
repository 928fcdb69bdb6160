//! The two-gate eligibility engine.
//!
//! Gate 1 is the default free-download path used when a feed carries no
//! rules; Gate 2 walks the attached rules in priority order and lets the
//! first match decide. The outcome is always an explicit enum so downstream
//! code sees the reason, never a bare boolean.

use chrono::{DateTime, Utc};
use tracing::trace;
use tracklet_core::{FilterRule, TorrentItem};
use tracklet_config::GlobalSettings;
use uuid::Uuid;

use crate::matcher::MatcherCache;

/// Why an item was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EligibilityReason {
    /// The default free-window gate accepted it.
    DefaultFree,
    /// A filter rule matched.
    RuleMatched {
        /// The deciding rule.
        rule_id: Uuid,
    },
}

/// Outcome of an eligibility evaluation. Total: every input produces
/// exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// The item should be downloaded and pushed.
    Eligible(EligibilityReason),
    /// The item is rejected; the reason is a stable code recorded on the
    /// repository record.
    Rejected {
        /// Stable rejection code.
        reason: &'static str,
    },
}

impl Eligibility {
    const fn rejected(reason: &'static str) -> Self {
        Self::Rejected { reason }
    }
}

/// Evaluate one item against the global settings and the feed's rules.
#[must_use]
pub fn evaluate(
    item: &TorrentItem,
    tag: Option<&str>,
    settings: &GlobalSettings,
    rules: &[FilterRule],
    matchers: &MatcherCache,
    now: DateTime<Utc>,
) -> Eligibility {
    if rules.is_empty() {
        return match free_gate(item, settings, now) {
            Ok(()) => Eligibility::Eligible(EligibilityReason::DefaultFree),
            Err(reason) => Eligibility::rejected(reason),
        };
    }

    let mut ordered: Vec<&FilterRule> = rules.iter().filter(|rule| rule.enabled).collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    for rule in ordered {
        let matcher = match matchers.get(rule) {
            Ok(matcher) => matcher,
            Err(error) => {
                // Stored rules are validated at creation; a compile failure
                // here means the store was edited out-of-band. Skip the rule.
                trace!(rule = %rule.id, error = %error, "skipping uncompilable rule");
                continue;
            }
        };
        if !matcher.matches_item(rule.match_field, item, tag) {
            continue;
        }

        if rule.require_free {
            if let Err(reason) = free_gate(item, settings, now) {
                return Eligibility::rejected(reason);
            }
        }
        return Eligibility::Eligible(EligibilityReason::RuleMatched { rule_id: rule.id });
    }

    Eligibility::rejected("no_rule_matched")
}

/// The default free-download criteria, shared by Gate 1 and by
/// `require_free` rules. An unknown promotion end skips the window-length
/// and completable checks rather than guessing a default.
fn free_gate(
    item: &TorrentItem,
    settings: &GlobalSettings,
    now: DateTime<Utc>,
) -> Result<(), &'static str> {
    let effective = item.discount.effective(item.discount_end_time, now);
    if !effective.is_free() {
        return Err("not_free");
    }

    if let Some(end) = item.discount_end_time {
        let remaining = end - now;

        if let Some(min_window) = settings.min_free_window() {
            if remaining < min_window {
                return Err("free_window_too_short");
            }
        }

        if settings.download_limit_enabled && settings.download_speed_limit > 0 {
            let needed_secs = item.size_bytes.div_ceil(settings.download_speed_limit);
            let remaining_secs = u64::try_from(remaining.num_seconds()).unwrap_or(0);
            if needed_secs > remaining_secs {
                return Err("cannot_complete_in_window");
            }
        }
    }

    if let Some(max_size) = settings.max_size_bytes() {
        if item.size_bytes > max_size {
            return Err("size_exceeded");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tracklet_core::{DiscountLevel, MatchField, PatternType};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    fn free_item(size_gib: u64, hours_left: i64) -> TorrentItem {
        TorrentItem {
            id: "164895".to_string(),
            title: "Test.Movie.2025".to_string(),
            size_bytes: size_gib * 1024 * 1024 * 1024,
            discount: DiscountLevel::Free,
            discount_end_time: Some(now() + Duration::hours(hours_left)),
            source_site: "hdsky".to_string(),
            ..TorrentItem::default()
        }
    }

    fn settings() -> GlobalSettings {
        GlobalSettings {
            min_free_minutes: 30,
            download_limit_enabled: true,
            download_speed_limit: 20 * 1024 * 1024,
            torrent_size_gb: 200,
            ..GlobalSettings::default()
        }
    }

    fn rule(
        pattern: &str,
        priority: i32,
        require_free: bool,
        pattern_type: PatternType,
    ) -> FilterRule {
        let created = now();
        FilterRule {
            id: Uuid::new_v4(),
            name: pattern.to_string(),
            pattern: pattern.to_string(),
            pattern_type,
            match_field: MatchField::Title,
            require_free,
            priority,
            enabled: true,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn happy_path_free_torrent_is_eligible() {
        // 42.5 GiB at 20 MiB/s needs ~36 minutes; a month-long window fits.
        let item = free_item(43, 24 * 28);
        let outcome = evaluate(&item, None, &settings(), &[], &MatcherCache::new(), now());
        assert_eq!(
            outcome,
            Eligibility::Eligible(EligibilityReason::DefaultFree)
        );
    }

    #[test]
    fn oversized_torrent_is_rejected_with_size_code() {
        let item = free_item(250, 24 * 28);
        let outcome = evaluate(&item, None, &settings(), &[], &MatcherCache::new(), now());
        assert_eq!(
            outcome,
            Eligibility::Rejected {
                reason: "size_exceeded"
            }
        );
    }

    #[test]
    fn non_free_torrent_fails_the_default_gate() {
        let mut item = free_item(10, 24);
        item.discount = DiscountLevel::HalfDown;
        let outcome = evaluate(&item, None, &settings(), &[], &MatcherCache::new(), now());
        assert_eq!(outcome, Eligibility::Rejected { reason: "not_free" });
    }

    #[test]
    fn expired_promotion_counts_as_not_free() {
        let item = free_item(10, -1);
        let outcome = evaluate(&item, None, &settings(), &[], &MatcherCache::new(), now());
        assert_eq!(outcome, Eligibility::Rejected { reason: "not_free" });
    }

    #[test]
    fn short_window_is_rejected() {
        let mut item = free_item(1, 0);
        item.discount_end_time = Some(now() + Duration::minutes(10));
        let outcome = evaluate(&item, None, &settings(), &[], &MatcherCache::new(), now());
        assert_eq!(
            outcome,
            Eligibility::Rejected {
                reason: "free_window_too_short"
            }
        );
    }

    #[test]
    fn window_too_small_for_the_payload_is_rejected() {
        // 100 GiB at 20 MiB/s needs ~85 minutes but only 70 remain.
        let mut item = free_item(100, 0);
        item.discount_end_time = Some(now() + Duration::minutes(70));
        let outcome = evaluate(&item, None, &settings(), &[], &MatcherCache::new(), now());
        assert_eq!(
            outcome,
            Eligibility::Rejected {
                reason: "cannot_complete_in_window"
            }
        );
    }

    #[test]
    fn unknown_end_skips_the_window_gates() {
        let mut item = free_item(100, 0);
        item.discount_end_time = None;
        let outcome = evaluate(&item, None, &settings(), &[], &MatcherCache::new(), now());
        assert_eq!(
            outcome,
            Eligibility::Eligible(EligibilityReason::DefaultFree)
        );
    }

    #[test]
    fn rule_precedence_lets_the_first_match_decide() {
        let high = rule("Game of Thrones", 10, true, PatternType::Keyword);
        let low = rule(".*", 5, false, PatternType::Regex);
        let rules = vec![low.clone(), high];

        let mut item = free_item(10, 24);
        item.title = "The.Office.S01E01".to_string();
        item.discount = DiscountLevel::None;
        item.discount_end_time = None;

        let outcome = evaluate(
            &item,
            None,
            &settings(),
            &rules,
            &MatcherCache::new(),
            now(),
        );
        assert_eq!(
            outcome,
            Eligibility::Eligible(EligibilityReason::RuleMatched { rule_id: low.id })
        );
    }

    #[test]
    fn require_free_rule_enforces_the_free_gate() {
        let strict = rule("Office", 10, true, PatternType::Keyword);
        let mut item = free_item(10, 24);
        item.title = "The.Office.S01E01".to_string();
        item.discount = DiscountLevel::None;

        let outcome = evaluate(
            &item,
            None,
            &settings(),
            &[strict],
            &MatcherCache::new(),
            now(),
        );
        assert_eq!(outcome, Eligibility::Rejected { reason: "not_free" });
    }

    #[test]
    fn no_matching_rule_is_an_explicit_rejection() {
        let only = rule("Thrones", 1, false, PatternType::Keyword);
        let mut item = free_item(10, 24);
        item.title = "Unrelated.Show".to_string();
        let outcome = evaluate(
            &item,
            None,
            &settings(),
            &[only],
            &MatcherCache::new(),
            now(),
        );
        assert_eq!(
            outcome,
            Eligibility::Rejected {
                reason: "no_rule_matched"
            }
        );
    }

    #[test]
    fn disabled_rules_are_ignored() {
        let mut off = rule(".*", 10, false, PatternType::Regex);
        off.enabled = false;
        let item = free_item(10, 24);
        let outcome = evaluate(
            &item,
            None,
            &settings(),
            &[off],
            &MatcherCache::new(),
            now(),
        );
        assert_eq!(
            outcome,
            Eligibility::Rejected {
                reason: "no_rule_matched"
            }
        );
    }
}
