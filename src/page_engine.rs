//! Opaque page-automation seam.
//!
//! The crawler treats the page engine as a black box with four operations:
//! load a URL, read meta, extract candidate links, close. The default engine
//! fetches HTML over HTTP and extracts statically; recorded SPA navigation
//! intents are approximated by scanning inline handlers for history/location
//! calls. A rendering engine can be swapped in behind the same trait.

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::models::{LinkCandidate, LinkKind};
use crate::network::{FetchError, HttpClient};

/// Title and description as read from the loaded page.
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
}

/// One loaded page. Read operations are answered from the load.
pub struct PageHandle {
    pub final_url: String,
    pub status: u16,
    meta: PageMeta,
    links: Vec<LinkCandidate>,
}

impl PageHandle {
    /// Assemble a handle directly; alternate engines build their results
    /// through this.
    pub fn new(final_url: String, status: u16, meta: PageMeta, links: Vec<LinkCandidate>) -> Self {
        Self {
            final_url,
            status,
            meta,
            links,
        }
    }

    pub fn read_meta(&self) -> &PageMeta {
        &self.meta
    }

    pub fn extract_links(&self) -> &[LinkCandidate] {
        &self.links
    }

    pub fn close(self) {}
}

#[async_trait]
pub trait PageEngine: Send + Sync {
    async fn load(&self, url: &str) -> Result<PageHandle, FetchError>;
}

/// Default engine: plain HTTP fetch plus static extraction.
pub struct HttpPageEngine {
    http: HttpClient,
}

impl HttpPageEngine {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PageEngine for HttpPageEngine {
    async fn load(&self, url: &str) -> Result<PageHandle, FetchError> {
        let response = self.http.fetch_page(url).await?;
        let final_url = response.final_url.clone();
        let status = response.status;

        // scraper documents are not Send; extract on the blocking pool and
        // return only owned data.
        let body = response.body;
        let (meta, links) = tokio::task::spawn_blocking(move || extract(&body))
            .await
            .map_err(|e| FetchError::BodyError(format!("extraction task failed: {}", e)))?;

        Ok(PageHandle {
            final_url,
            status,
            meta,
            links,
        })
    }
}

/// Static extraction of meta content and link candidates.
pub fn extract(html: &str) -> (PageMeta, Vec<LinkCandidate>) {
    let document = Html::parse_document(html);

    let meta = PageMeta {
        title: first_of(
            &document,
            &[
                ("meta[name=\"title\"]", Some("content")),
                ("meta[property=\"og:title\"]", Some("content")),
                ("title", None),
            ],
        ),
        description: first_of(
            &document,
            &[
                ("meta[name=\"description\"]", Some("content")),
                ("meta[property=\"og:description\"]", Some("content")),
            ],
        ),
    };

    let mut links: Vec<LinkCandidate> = Vec::new();

    let anchors = Selector::parse("a[href]").unwrap();
    for el in document.select(&anchors) {
        if let Some(href) = el.value().attr("href") {
            links.push(LinkCandidate {
                url: href.to_string(),
                text: element_text(&el),
                kind: LinkKind::A,
            });
        }
    }

    let role_links = Selector::parse("[role=\"link\"]").unwrap();
    for el in document.select(&role_links) {
        let target = el
            .value()
            .attr("href")
            .or_else(|| el.value().attr("data-href"))
            .or_else(|| el.value().attr("data-url"));
        if let Some(target) = target {
            links.push(LinkCandidate {
                url: target.to_string(),
                text: element_text(&el),
                kind: LinkKind::Button,
            });
        }
    }

    let data_targets = Selector::parse("[data-href], [data-url]").unwrap();
    for el in document.select(&data_targets) {
        if el.value().attr("role") == Some("link") {
            continue; // already collected above
        }
        let target = el
            .value()
            .attr("data-href")
            .or_else(|| el.value().attr("data-url"));
        if let Some(target) = target {
            links.push(LinkCandidate {
                url: target.to_string(),
                text: element_text(&el),
                kind: LinkKind::Button,
            });
        }
    }

    let clickables = Selector::parse("[onclick]").unwrap();
    for el in document.select(&clickables) {
        if let Some(handler) = el.value().attr("onclick") {
            if let Some((target, kind)) = navigation_intent(handler) {
                links.push(LinkCandidate {
                    url: target,
                    text: element_text(&el),
                    kind,
                });
            }
        }
    }

    // Same target found twice keeps its first (most specific) record.
    let mut seen = std::collections::HashSet::new();
    links.retain(|l| !l.url.trim().is_empty() && seen.insert((l.url.clone(), l.kind)));

    (meta, links)
}

fn first_of(document: &Html, selectors: &[(&str, Option<&str>)]) -> String {
    for (sel, attr) in selectors {
        let selector = match Selector::parse(sel) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Some(el) = document.select(&selector).next() {
            let value = match attr {
                Some(name) => el.value().attr(name).unwrap_or("").to_string(),
                None => el.text().collect::<String>(),
            };
            let value = value.trim().to_string();
            if !value.is_empty() {
                return value;
            }
        }
    }
    String::new()
}

fn element_text(el: &scraper::ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Recognize a navigation target inside an inline handler. SPA history calls
/// are tagged separately from direct location assignment.
fn navigation_intent(handler: &str) -> Option<(String, LinkKind)> {
    const SPA_CALLS: &[&str] = &["history.pushState", "history.replaceState"];
    const LOCATION_CALLS: &[&str] = &[
        "location.href",
        "location.assign",
        "location.replace",
        "window.location",
        "window.open",
    ];

    let kind = if SPA_CALLS.iter().any(|c| handler.contains(c)) {
        LinkKind::Spa
    } else if LOCATION_CALLS.iter().any(|c| handler.contains(c)) {
        LinkKind::Onclick
    } else {
        return None;
    };

    // The target is the first quoted string that reads as a URL or path.
    quoted_strings(handler)
        .into_iter()
        .find(|s| s.starts_with('/') || s.starts_with("http://") || s.starts_with("https://"))
        .map(|target| (target, kind))
}

fn quoted_strings(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\'' || ch == '"' {
            let quote = ch;
            let mut literal = String::new();
            for inner in chars.by_ref() {
                if inner == quote {
                    break;
                }
                literal.push(inner);
            }
            out.push(literal);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
<title>Doc Title</title>
<meta property="og:title" content="OG Title">
<meta name="description" content="Meta description here.">
</head><body>
<a href="/docs/intro">Intro <b>guide</b></a>
<a href="https://other.test/external">External</a>
<span role="link" data-href="/pricing">Pricing</span>
<div data-url="/features">Features</div>
<button onclick="location.href='/contact'">Contact</button>
<button onclick="history.pushState({}, '', '/app/dashboard')">Dashboard</button>
<button onclick="doSomething()">Noop</button>
</body></html>"#;

    #[test]
    fn test_meta_priority_prefers_og_over_document_title() {
        let (meta, _) = extract(PAGE);
        assert_eq!(meta.title, "OG Title");
        assert_eq!(meta.description, "Meta description here.");
    }

    #[test]
    fn test_meta_name_title_wins_over_og() {
        let html = r#"<head><meta name="title" content="Named"><meta property="og:title" content="OG"><title>Doc</title></head>"#;
        let (meta, _) = extract(html);
        assert_eq!(meta.title, "Named");
    }

    #[test]
    fn test_document_title_fallback() {
        let html = "<head><title> Fallback </title></head>";
        let (meta, _) = extract(html);
        assert_eq!(meta.title, "Fallback");
        assert_eq!(meta.description, "");
    }

    #[test]
    fn test_link_kinds_extracted() {
        let (_, links) = extract(PAGE);
        let by_kind = |kind: LinkKind| -> Vec<&LinkCandidate> {
            links.iter().filter(|l| l.kind == kind).collect()
        };

        let anchors = by_kind(LinkKind::A);
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].url, "/docs/intro");
        assert_eq!(anchors[0].text, "Intro guide");

        let buttons = by_kind(LinkKind::Button);
        assert_eq!(buttons.len(), 2);

        let onclick = by_kind(LinkKind::Onclick);
        assert_eq!(onclick.len(), 1);
        assert_eq!(onclick[0].url, "/contact");

        let spa = by_kind(LinkKind::Spa);
        assert_eq!(spa.len(), 1);
        assert_eq!(spa[0].url, "/app/dashboard");
    }

    #[test]
    fn test_navigation_intent_ignores_non_navigation() {
        assert!(navigation_intent("trackEvent('click')").is_none());
        assert!(navigation_intent("location.href='/x'").is_some());
        // pushState with an empty second arg still finds the path.
        let (url, kind) = navigation_intent("history.pushState(null, '', '/next')").unwrap();
        assert_eq!(url, "/next");
        assert_eq!(kind, LinkKind::Spa);
    }

    #[test]
    fn test_duplicate_targets_deduped() {
        let html = r#"<a href="/a">one</a><a href="/a">two</a>"#;
        let (_, links) = extract(html);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "one");
    }
}
