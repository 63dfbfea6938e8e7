//! URL helper functions used throughout the crawler.

use url::Url;

/// Query params dropped during normalization regardless of configuration.
const ANALYTICS_PARAMS: &[&str] = &["gclid", "fbclid"];

/// Extensions that mark a path as a static asset rather than a page.
const ASSET_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico", ".avif", ".woff", ".woff2", ".ttf",
    ".otf", ".eot", ".mp4", ".webm", ".avi", ".mov", ".mp3", ".wav", ".ogg", ".css", ".js",
    ".mjs", ".map", ".pdf", ".zip", ".gz", ".tar", ".rar", ".7z", ".exe", ".dmg", ".xml",
];

/// Normalize a URL for cataloging and claim keys.
///
/// Lowercases the host, strips the fragment, drops analytics params
/// (`utm_*`, `gclid`, `fbclid`), drops `page` unless pagination is kept, and
/// removes the trailing slash except at the root. Returns `None` for
/// non-HTTP(S) or unparseable input. Idempotent.
pub fn normalize_url(raw: &str, keep_page_param: bool) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    parsed.set_host(Some(&host)).ok()?;
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            if k.starts_with("utm_") || ANALYTICS_PARAMS.contains(&k.as_str()) {
                return false;
            }
            if k == "page" && !keep_page_param {
                return false;
            }
            true
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let mut out = parsed.to_string();
    // Trailing slash is meaningful only at the root.
    if parsed.path() != "/" && parsed.query().is_none() {
        while out.ends_with('/') {
            out.pop();
        }
    }
    Some(out)
}

/// Resolve a possibly-relative link against its page URL.
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Whether the path ends in a known static-asset extension.
pub fn is_asset_path(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_ascii_lowercase(),
        Err(_) => return false,
    };
    ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Same origin, or same registrable domain across subdomains. The
/// registrable domain is approximated by the last two host labels.
pub fn same_site(url: &str, base: &Url) -> bool {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };
    if parsed.origin() == base.origin() {
        return true;
    }

    let tail = |host: &str| {
        let mut labels = host.rsplit('.');
        (
            labels.next().map(str::to_ascii_lowercase),
            labels.next().map(str::to_ascii_lowercase),
        )
    };
    match (parsed.host_str(), base.host_str()) {
        (Some(a), Some(b)) => tail(a) == tail(b),
        _ => false,
    }
}

/// Whether the URL path falls under the configured prefix. Empty prefix
/// matches everything.
pub fn has_prefix(url: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => return false,
    };
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Loose test used by the input classifier: absolute, scheme-relative, or
/// site-rooted URL shapes.
pub fn looks_like_url(cell: &str) -> bool {
    let cell = cell.trim();
    if cell.starts_with("http://") || cell.starts_with("https://") || cell.starts_with("//") {
        return true;
    }
    // Site-rooted path: "/about" but not "//" (scheme-relative, above).
    let mut chars = cell.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('/'), Some(second)) if second != '/' && !second.is_whitespace()
    )
}

/// Path segments of a normalized URL, excluding empties.
pub fn path_segments(url: &str) -> Vec<String> {
    match Url::parse(url) {
        Ok(u) => u
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}
