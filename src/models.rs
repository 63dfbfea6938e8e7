//! Record types shared across the discovery-fetch-report pipeline.

use serde::{Deserialize, Serialize};

/// How a link candidate was discovered on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Plain anchor element.
    A,
    /// Button-like element carrying a navigation target (role=link, data-href).
    Button,
    /// Recorded single-page-app navigation intent.
    Spa,
    /// Inline onclick handler with a recognizable navigation call.
    Onclick,
}

/// One candidate link extracted from a page, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCandidate {
    pub url: String,
    pub text: String,
    pub kind: LinkKind,
}

/// Meta record for one fetched page, keyed by the normalized final URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    pub description: String,
    pub title_normalized: String,
    pub links: Vec<LinkCandidate>,
    /// Unix seconds of the fetch that produced this record.
    pub last_fetched: u64,
}

/// Internal-link edge appended to the per-worker NDJSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub page_url: String,
    pub link_url: String,
    pub text: String,
    pub kind: LinkKind,
}

/// One row of the optional expected-content input. At least one field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRow {
    pub expected_url: Option<String>,
    pub expected_title: Option<String>,
    pub expected_description: Option<String>,
}

/// Outcome of an existence probe for one input URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistenceRecord {
    pub input_url: String,
    pub exists: bool,
    pub http_status: u16,
    pub final_url: String,
}

/// Crawl mode derived from the input shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    NoInput,
    ExplicitUrls,
    Discovery,
    SingleText,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::NoInput => "no-input",
            RunMode::ExplicitUrls => "explicit-urls",
            RunMode::Discovery => "discovery",
            RunMode::SingleText => "single-text",
        }
    }
}

/// Report artifacts the user can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Urls,
    SiteCatalog,
    InternalLinks,
    Tree,
    ExistenceCsv,
    ComparisonCsv,
}

impl OutputKind {
    pub const ALL: [OutputKind; 6] = [
        OutputKind::Urls,
        OutputKind::SiteCatalog,
        OutputKind::InternalLinks,
        OutputKind::Tree,
        OutputKind::ExistenceCsv,
        OutputKind::ComparisonCsv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Urls => "urls",
            OutputKind::SiteCatalog => "site_catalog",
            OutputKind::InternalLinks => "internal_links",
            OutputKind::Tree => "tree",
            OutputKind::ExistenceCsv => "existence_csv",
            OutputKind::ComparisonCsv => "comparison_csv",
        }
    }
}

/// Control-channel config persisted to `telemetry/config.json` and read by
/// workers at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedConfig {
    pub outputs: Vec<OutputKind>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_kind_wire_names() {
        let json = serde_json::to_string(&OutputKind::ExistenceCsv).unwrap();
        assert_eq!(json, "\"existence_csv\"");
        let back: OutputKind = serde_json::from_str("\"site_catalog\"").unwrap();
        assert_eq!(back, OutputKind::SiteCatalog);
    }

    #[test]
    fn test_run_mode_names() {
        assert_eq!(RunMode::ExplicitUrls.as_str(), "explicit-urls");
        assert_eq!(
            serde_json::to_string(&RunMode::NoInput).unwrap(),
            "\"no-input\""
        );
    }
}
