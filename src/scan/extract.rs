//! Selector-driven listing extraction and item filtering.
//!
//! All parsing happens synchronously on an owned HTML string so no
//! non-Send parser state is ever held across an await point.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use crate::models::{DiscoveredRfp, PortalFilters, PortalSelectors};

/// Errors from selector parsing.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

fn parse_selector(raw: &str) -> Result<Selector, ExtractError> {
    Selector::parse(raw).map_err(|e| ExtractError::InvalidSelector {
        selector: raw.to_string(),
        message: e.to_string(),
    })
}

/// Resolve a possibly-relative href against the page URL.
pub fn resolve_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match Url::parse(base_url).and_then(|base| base.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => format!("{}{}", base_url.trim_end_matches('/'), href),
    }
}

fn select_text(item: &ElementRef<'_>, selector: &Option<String>) -> Result<Option<String>, ExtractError> {
    let Some(raw) = selector else {
        return Ok(None);
    };
    let selector = parse_selector(raw)?;
    let text = item.select(&selector).next().map(|el| {
        el.text().collect::<String>().trim().to_string()
    });
    Ok(text.filter(|t| !t.is_empty()))
}

/// Extract listing items from one portal page.
///
/// Items without a title are skipped; items without a link fall back to
/// a fragment of the page URL so they still carry a stable source URL.
pub fn extract_listings(
    html: &str,
    page_url: &str,
    portal_id: &str,
    selectors: &PortalSelectors,
) -> Result<Vec<DiscoveredRfp>, ExtractError> {
    let item_selector = parse_selector(&selectors.item)?;
    let title_selector = parse_selector(&selectors.title)?;

    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for (index, element) in document.select(&item_selector).enumerate() {
        let title = element
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
        let Some(title) = title else {
            continue;
        };

        let source_url = match &selectors.link {
            Some(raw) => {
                let link_selector = parse_selector(raw)?;
                element
                    .select(&link_selector)
                    .next()
                    .and_then(|el| el.value().attr("href"))
                    .map(|href| resolve_url(page_url, href))
            }
            None => element
                .value()
                .attr("href")
                .map(|href| resolve_url(page_url, href)),
        }
        .unwrap_or_else(|| format!("{}#item-{}", page_url, index));

        let value_text = select_text(&element, &selectors.value)?;

        items.push(DiscoveredRfp {
            title,
            agency: select_text(&element, &selectors.agency)?,
            source_url,
            deadline: select_text(&element, &selectors.deadline)?,
            estimated_value: value_text.as_deref().and_then(parse_money),
            portal_id: portal_id.to_string(),
        });
    }

    Ok(items)
}

/// Find the next listing page, if the portal defines a pagination
/// selector and the page links one.
pub fn next_page_url(
    html: &str,
    page_url: &str,
    selectors: &PortalSelectors,
) -> Result<Option<String>, ExtractError> {
    let Some(raw) = &selectors.next_page else {
        return Ok(None);
    };
    let next_selector = parse_selector(raw)?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&next_selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| resolve_url(page_url, href)))
}

/// Apply value-range and keyword filters to an extracted item.
pub fn passes_filters(rfp: &DiscoveredRfp, filters: &PortalFilters) -> bool {
    if let (Some(min), Some(value)) = (filters.min_value, rfp.estimated_value) {
        if value < min {
            return false;
        }
    }
    if let (Some(max), Some(value)) = (filters.max_value, rfp.estimated_value) {
        if value > max {
            return false;
        }
    }

    let title = rfp.title.to_lowercase();
    if !filters.include_keywords.is_empty()
        && !filters
            .include_keywords
            .iter()
            .any(|k| title.contains(&k.to_lowercase()))
    {
        return false;
    }
    if filters
        .exclude_keywords
        .iter()
        .any(|k| title.contains(&k.to_lowercase()))
    {
        return false;
    }

    true
}

/// Parse an estimated-value string like "$1,500,000" or "USD 42000.50".
pub fn parse_money(text: &str) -> Option<f64> {
    static MONEY: OnceLock<Regex> = OnceLock::new();
    let re = MONEY.get_or_init(|| {
        Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("money regex is valid")
    });
    let matched = re.find(text)?;
    matched.as_str().replace(',', "").parse().ok()
}
