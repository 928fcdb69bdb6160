//! Selector evaluation over parsed HTML.
//!
//! These helpers are synchronous on purpose: a `scraper::Html` document is
//! not `Send`, so drivers parse a fetched body in one call and never hold a
//! document across an await point.

use scraper::{ElementRef, Html, Selector};

use super::apply_filters;
use crate::definition::SelectorRule;

/// Attribute pseudo-name reading the text of the matched element's parent.
pub const PARENT_TEXT: &str = "@parent-text";

/// Compile a selector, treating failures as a missing value. Definition
/// selectors are static; a typo shows up as an always-absent field, which
/// the drivers log per item.
fn compile(selector: &str) -> Option<Selector> {
    Selector::parse(selector).ok()
}

/// First element matching `selector` below `scope`.
#[must_use]
pub fn select_first<'a>(scope: ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let compiled = compile(selector)?;
    scope.select(&compiled).next()
}

/// All elements matching `selector` in the document.
#[must_use]
pub fn select_all<'a>(document: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    compile(selector).map_or_else(Vec::new, |compiled| document.select(&compiled).collect())
}

/// Concatenated, whitespace-collapsed text of an element.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    let joined: String = element.text().collect();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Evaluate one extraction rule below `scope`: select, read text or an
/// attribute, then run the filter pipeline. An empty selector targets the
/// scope element itself.
#[must_use]
pub fn extract(scope: ElementRef<'_>, rule: &SelectorRule, tz_offset_hours: i8) -> Option<String> {
    let element = if rule.selector.is_empty() {
        scope
    } else {
        select_first(scope, &rule.selector)?
    };

    let raw = match rule.attr.as_deref() {
        None => element_text(element),
        Some(PARENT_TEXT) => {
            let parent = element.parent().and_then(ElementRef::wrap)?;
            element_text(parent)
        }
        Some(attr) => element.value().attr(attr)?.to_string(),
    };

    let value = apply_filters(&raw, &rule.filters, tz_offset_hours)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Evaluate one extraction rule against the whole document.
#[must_use]
pub fn extract_from_document(
    document: &Html,
    rule: &SelectorRule,
    tz_offset_hours: i8,
) -> Option<String> {
    extract(document.root_element(), rule, tz_offset_hours)
}

/// The class list of the first element matching `selector`, used for
/// promotion mapping.
#[must_use]
pub fn classes_of(scope: ElementRef<'_>, selector: &str) -> Vec<String> {
    select_first(scope, selector).map_or_else(Vec::new, |element| {
        element.value().classes().map(str::to_string).collect()
    })
}

/// Whether any element in the document matches `selector`; used for markers
/// like the Hit-and-Run badge.
#[must_use]
pub fn document_has(document: &Html, selector: &str) -> bool {
    compile(selector).is_some_and(|compiled| document.select(&compiled).next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::FilterStep;

    const ROW: &str = r#"
        <table><tr class="row">
            <td class="torrentname">
                <a href="details.php?id=164895&amp;hit=1" title="Test.Movie.2025">Test.Movie.2025</a>
                <img class="pro_free" alt="Free" />
            </td>
            <td class="size">42.5 GiB</td>
            <td class="seeders"><b>87</b></td>
        </tr></table>
    "#;

    #[test]
    fn extract_reads_text_attributes_and_filters() {
        let document = Html::parse_document(ROW);
        let row = select_all(&document, "tr.row");
        let row = row[0];

        let title = SelectorRule::attr("td.torrentname a", "title");
        assert_eq!(extract(row, &title, 8), Some("Test.Movie.2025".to_string()));

        let id = SelectorRule::attr("td.torrentname a", "href")
            .with(FilterStep::QueryString("id".to_string()));
        assert_eq!(extract(row, &id, 8), Some("164895".to_string()));

        let size = SelectorRule::text("td.size").with(FilterStep::ParseSize);
        assert_eq!(extract(row, &size, 8), Some("45634027520".to_string()));

        let seeders = SelectorRule::text("td.seeders").with(FilterStep::ParseNumber);
        assert_eq!(extract(row, &seeders, 8), Some("87".to_string()));
    }

    #[test]
    fn missing_selector_is_a_missing_field() {
        let document = Html::parse_document(ROW);
        let row = select_all(&document, "tr.row")[0];
        let rule = SelectorRule::text("td.nonexistent");
        assert_eq!(extract(row, &rule, 8), None);

        let broken = SelectorRule::text("td:((");
        assert_eq!(extract(row, &broken, 8), None);
    }

    #[test]
    fn promotion_classes_come_from_the_badge() {
        let document = Html::parse_document(ROW);
        let row = select_all(&document, "tr.row")[0];
        let classes = classes_of(row, "td.torrentname img");
        assert_eq!(classes, vec!["pro_free".to_string()]);
    }

    #[test]
    fn parent_text_reads_the_enclosing_element() {
        let html = r#"<div><span class="label">Seeders:</span> 42</div>"#;
        let document = Html::parse_document(html);
        let scope = document.root_element();
        let rule = SelectorRule {
            selector: "span.label".to_string(),
            attr: Some(PARENT_TEXT.to_string()),
            filters: vec![FilterStep::ParseNumber],
        };
        assert_eq!(extract(scope, &rule, 8), Some("42".to_string()));
    }

    #[test]
    fn document_marker_probe() {
        let html = r#"<body><img src="pic/hit_run.gif" /></body>"#;
        let document = Html::parse_document(html);
        assert!(document_has(&document, r#"img[src*="hit_run.gif"]"#));
        assert!(!document_has(&document, r#"img[src*="other.gif"]"#));
    }
}
