//! CSS-selector extraction over captured results and thread pages.

use replyscout_core::{is_media_link, RawItem};
use scraper::{ElementRef, Html, Selector};

use crate::AdapterError;

pub const POST_SELECTOR: &str = "article[data-testid='tweet']";
pub const STATUS_LINK_SELECTOR: &str = "a[href*='/status/']";
pub const TEXT_SELECTOR: &str = "div[data-testid='tweetText']";
pub const AUTHOR_SELECTOR: &str = "div[data-testid='User-Name']";
pub const TIME_SELECTOR: &str = "time[datetime]";
pub const THREAD_AUTHOR_LINK_SELECTOR: &str = "div[data-testid='User-Name'] a[role='link']";

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(format!("bad selector {css}: {e}")))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<Vec<_>>().join(" ")))
}

fn absolutize(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}

/// One `RawItem` per post block. Missing pieces stay `None`; the cycle decides
/// whether an item is usable.
pub fn extract_raw_items(html: &str, base_url: &str) -> Result<Vec<RawItem>, AdapterError> {
    let post_sel = selector(POST_SELECTOR)?;
    let link_sel = selector(STATUS_LINK_SELECTOR)?;
    let text_sel = selector(TEXT_SELECTOR)?;
    let author_sel = selector(AUTHOR_SELECTOR)?;
    let time_sel = selector(TIME_SELECTOR)?;

    let document = Html::parse_document(html);
    let items = document
        .select(&post_sel)
        .map(|post| {
            let url = post
                .select(&link_sel)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| !is_media_link(href))
                .map(|href| absolutize(href, base_url));
            let timestamp = post
                .select(&time_sel)
                .next()
                .and_then(|t| t.value().attr("datetime"))
                .map(str::to_string);
            RawItem {
                url,
                text: first_text(post, &text_sel),
                author: first_text(post, &author_sel),
                timestamp,
            }
        })
        .collect();
    Ok(items)
}

/// True when any author link on a thread page carries `@identity`.
pub fn thread_has_reply_from(html: &str, identity: &str) -> Result<bool, AdapterError> {
    let link_sel = selector(THREAD_AUTHOR_LINK_SELECTOR)?;
    let handle = format!("@{}", identity.trim_start_matches('@').to_lowercase());
    let document = Html::parse_document(html);
    let found = document
        .select(&link_sel)
        .any(|a| a.text().collect::<String>().to_lowercase().contains(&handle));
    Ok(found)
}
