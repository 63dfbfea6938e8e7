//! Final report writers: catalog, duplicate titles, tree renders, existence
//! artifacts, comparison, extras, and the run summary.

pub mod comparison;
pub mod tree;

use std::collections::BTreeMap;
use std::path::Path;

use crate::classifier::ClassifiedInput;
use crate::fs_atomic::{self, FsError};
use crate::models::{ExistenceRecord, OutputKind, PageRecord};

pub use comparison::{compare, extras, ComparisonRow, MatchVerdict};

/// Quote a CSV field when it needs quoting.
pub fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Everything the writers need, gathered by the orchestrator after merge.
pub struct ReportInputs<'a> {
    pub out_dir: &'a Path,
    pub selected: &'a [OutputKind],
    pub urls: &'a [String],
    pub pages: &'a [PageRecord],
    pub edge_count: u64,
    pub existence: &'a [ExistenceRecord],
    pub input: &'a ClassifiedInput,
    pub keep_page_param: bool,
    pub duration_secs: u64,
}

/// Row counts for the summary artifact.
#[derive(Debug, Default)]
pub struct ReportTotals {
    pub urls: usize,
    pub pages: usize,
    pub edges: u64,
    pub existence_rows: usize,
    pub comparison_rows: usize,
    pub extras: usize,
    pub duplicate_titles: usize,
}

/// Write every selected report and the summary. Returns the totals.
pub async fn write_all(inputs: &ReportInputs<'_>) -> Result<ReportTotals, FsError> {
    let mut totals = ReportTotals {
        urls: inputs.urls.len(),
        pages: inputs.pages.len(),
        edges: inputs.edge_count,
        ..Default::default()
    };

    if inputs.selected.contains(&OutputKind::Urls) {
        let mut body = inputs.urls.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs_atomic::write_atomic(&inputs.out_dir.join("urls-final.txt"), body.as_bytes()).await?;
    }

    if inputs.selected.contains(&OutputKind::SiteCatalog) {
        write_site_catalog(&inputs.out_dir.join("site_catalog.csv"), inputs.pages).await?;
        totals.duplicate_titles =
            write_duplicate_titles(&inputs.out_dir.join("duplicate-titles.csv"), inputs.pages)
                .await?;
    }

    if inputs.selected.contains(&OutputKind::Tree) {
        fs_atomic::write_atomic(
            &inputs.out_dir.join("tree.txt"),
            tree::render_tree(inputs.urls).as_bytes(),
        )
        .await?;
        fs_atomic::write_atomic(
            &inputs.out_dir.join("tree-examples.md"),
            tree::render_examples(inputs.urls, 3).as_bytes(),
        )
        .await?;
    }

    if inputs.selected.contains(&OutputKind::ExistenceCsv) {
        totals.existence_rows =
            write_existence_final(inputs.out_dir, inputs.existence).await?;
    }

    if inputs.selected.contains(&OutputKind::ComparisonCsv) {
        let rows = compare(inputs.input, inputs.pages, inputs.keep_page_param);
        totals.comparison_rows = rows.len();
        comparison::write_comparison(&inputs.out_dir.join("comparison.csv"), &rows).await?;

        let extra_pages = extras(inputs.input, inputs.pages, false);
        totals.extras = extra_pages.len();
        comparison::write_extras(&inputs.out_dir.join("extras.csv"), &extra_pages).await?;
    }

    write_summary(&inputs.out_dir.join("summary.txt"), inputs, &totals).await?;
    Ok(totals)
}

/// One row per page record, sorted by URL.
pub async fn write_site_catalog(path: &Path, pages: &[PageRecord]) -> Result<(), FsError> {
    let mut sorted: Vec<&PageRecord> = pages.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url));

    let mut body = String::from("url,title,description\n");
    for page in sorted {
        body.push_str(&format!(
            "{},{},{}\n",
            csv_escape(&page.url),
            csv_escape(&page.title),
            csv_escape(&page.description),
        ));
    }
    fs_atomic::write_atomic(path, body.as_bytes()).await
}

/// Titles seen on two or more distinct URLs.
pub async fn write_duplicate_titles(path: &Path, pages: &[PageRecord]) -> Result<usize, FsError> {
    let mut by_title: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for page in pages {
        if page.title_normalized.is_empty() {
            continue;
        }
        by_title
            .entry(page.title_normalized.as_str())
            .or_default()
            .push(page.url.as_str());
    }

    let mut body = String::from("title,count,urls\n");
    let mut rows = 0usize;
    for (title, mut urls) in by_title {
        urls.sort();
        urls.dedup();
        if urls.len() < 2 {
            continue;
        }
        rows += 1;
        body.push_str(&format!(
            "{},{},{}\n",
            csv_escape(title),
            urls.len(),
            csv_escape(&urls.join(" ")),
        ));
    }
    fs_atomic::write_atomic(path, body.as_bytes()).await?;
    Ok(rows)
}

/// Final existence artifacts from the merged records.
pub async fn write_existence_final(
    out_dir: &Path,
    records: &[ExistenceRecord],
) -> Result<usize, FsError> {
    let mut csv = String::from("input_url,exists,http_status,final_url\n");
    let mut working = String::new();
    let mut broken = String::new();
    for record in records {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            csv_escape(&record.input_url),
            record.exists,
            record.http_status,
            csv_escape(&record.final_url),
        ));
        if record.exists {
            working.push_str(&record.input_url);
            working.push('\n');
        } else {
            broken.push_str(&record.input_url);
            broken.push('\n');
        }
    }
    fs_atomic::write_atomic(&out_dir.join("url-existence.csv"), csv.as_bytes()).await?;

    let by_input: BTreeMap<&str, &ExistenceRecord> = records
        .iter()
        .map(|r| (r.input_url.as_str(), r))
        .collect();
    let json = serde_json::to_vec_pretty(&by_input).unwrap_or_else(|_| b"{}".to_vec());
    fs_atomic::write_atomic(&out_dir.join("url-existence.json"), &json).await?;

    fs_atomic::write_atomic(&out_dir.join("working-urls.txt"), working.as_bytes()).await?;
    fs_atomic::write_atomic(&out_dir.join("not-working-urls.txt"), broken.as_bytes()).await?;
    Ok(records.len())
}

async fn write_summary(
    path: &Path,
    inputs: &ReportInputs<'_>,
    totals: &ReportTotals,
) -> Result<(), FsError> {
    let mut body = String::new();
    body.push_str("metacrawl run summary\n");
    body.push_str("=====================\n");
    body.push_str(&format!("duration: {}s\n", inputs.duration_secs));
    body.push_str(&format!("urls: {}\n", totals.urls));
    body.push_str(&format!("pages cataloged: {}\n", totals.pages));
    if inputs.selected.contains(&OutputKind::InternalLinks) {
        body.push_str(&format!("internal edges: {}\n", totals.edges));
    }
    if inputs.selected.contains(&OutputKind::ExistenceCsv) {
        body.push_str(&format!("existence rows: {}\n", totals.existence_rows));
    }
    if inputs.selected.contains(&OutputKind::ComparisonCsv) {
        body.push_str(&format!("comparison rows: {}\n", totals.comparison_rows));
        body.push_str(&format!("extras: {}\n", totals.extras));
    }
    if totals.duplicate_titles > 0 {
        body.push_str(&format!("duplicate titles: {}\n", totals.duplicate_titles));
    }
    body.push_str(&format!(
        "outputs: {}\n",
        inputs
            .selected
            .iter()
            .map(|o| o.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    fs_atomic::write_atomic(path, body.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn page(url: &str, title: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            title: title.to_string(),
            description: format!("About {}", title),
            title_normalized: crate::text_norm::normalize_text(title),
            links: Vec::new(),
            last_fetched: 0,
        }
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn test_site_catalog_rows_and_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site_catalog.csv");
        let pages = vec![
            page("https://a.test/b", "Bravo, Page"),
            page("https://a.test/a", "Alpha"),
        ];
        write_site_catalog(&path, &pages).await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "url,title,description");
        assert!(lines[1].starts_with("https://a.test/a,"));
        assert!(lines[2].contains("\"Bravo, Page\""));
    }

    #[tokio::test]
    async fn test_duplicate_titles_need_two_distinct_urls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("duplicate-titles.csv");
        let pages = vec![
            page("https://a.test/1", "Shared Title"),
            page("https://a.test/2", "shared title"),
            page("https://a.test/3", "Unique"),
        ];
        let rows = write_duplicate_titles(&path, &pages).await.unwrap();
        assert_eq!(rows, 1);

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("shared title,2,"));
        assert!(!body.contains("Unique"));
    }

    #[tokio::test]
    async fn test_existence_final_files() {
        let dir = TempDir::new().unwrap();
        let records = vec![
            ExistenceRecord {
                input_url: "https://a.test/ok".to_string(),
                exists: true,
                http_status: 200,
                final_url: "https://a.test/ok".to_string(),
            },
            ExistenceRecord {
                input_url: "https://a.test/gone".to_string(),
                exists: false,
                http_status: 404,
                final_url: "https://a.test/gone".to_string(),
            },
        ];
        let count = write_existence_final(dir.path(), &records).await.unwrap();
        assert_eq!(count, 2);

        let csv = std::fs::read_to_string(dir.path().join("url-existence.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);
        let working = std::fs::read_to_string(dir.path().join("working-urls.txt")).unwrap();
        assert_eq!(working.trim(), "https://a.test/ok");

        let json = std::fs::read_to_string(dir.path().join("url-existence.json")).unwrap();
        let map: std::collections::BTreeMap<String, ExistenceRecord> =
            serde_json::from_str(&json).unwrap();
        assert!(!map["https://a.test/gone"].exists);
    }
}
