// Bootstrap the frontier from sitemap XML when the site advertises one.

use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::io::Cursor;

use crate::network::HttpClient;

const COMMON_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml"];

pub struct SitemapSeeder {
    http: HttpClient,
}

impl SitemapSeeder {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    // Fetch sitemap XML; anything but a 200 means "no sitemap here".
    async fn fetch_sitemap(&self, sitemap_url: &str) -> Option<Vec<u8>> {
        match self.http.fetch_page(sitemap_url).await {
            Ok(result) if result.status == 200 => Some(result.body.into_bytes()),
            _ => None,
        }
    }

    // Split entries into page URLs and nested sitemap references.
    fn parse_sitemap(&self, xml_data: &[u8]) -> (Vec<String>, Vec<String>) {
        let mut urls = Vec::new();
        let mut nested = Vec::new();
        let parser = SiteMapReader::new(Cursor::new(xml_data));

        for entity in parser {
            match entity {
                SiteMapEntity::Url(entry) => {
                    if let Some(url) = entry.loc.get_url() {
                        urls.push(url.to_string());
                    }
                }
                SiteMapEntity::SiteMap(entry) => {
                    if let Some(url) = entry.loc.get_url() {
                        nested.push(url.to_string());
                    }
                }
                _ => {}
            }
        }

        (urls, nested)
    }

    /// Discover URLs from the conventional sitemap locations. An empty result
    /// means the caller falls back to frontier crawling.
    pub async fn discover(&self, origin: &str) -> Vec<String> {
        let origin = origin.trim_end_matches('/');
        let mut discovered = Vec::new();

        for path in COMMON_PATHS {
            let sitemap_url = format!("{}{}", origin, path);
            let xml = match self.fetch_sitemap(&sitemap_url).await {
                Some(data) => data,
                None => continue,
            };
            tracing::info!(url = %sitemap_url, "sitemap found");

            let (urls, nested) = self.parse_sitemap(&xml);
            discovered.extend(urls);

            // Follow sitemap-index entries one level deep.
            for nested_url in nested {
                if let Some(data) = self.fetch_sitemap(&nested_url).await {
                    let (urls, _) = self.parse_sitemap(&data);
                    tracing::debug!(url = %nested_url, count = urls.len(), "nested sitemap");
                    discovered.extend(urls);
                }
            }

            // One found sitemap is enough; conventions overlap.
            break;
        }

        tracing::info!(count = discovered.len(), "sitemap discovery finished");
        discovered
    }
}
