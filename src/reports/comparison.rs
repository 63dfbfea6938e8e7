//! Expected-vs-actual comparison: per-row verdicts, SEO length stamps, and
//! the extras report of pages the input never mentioned.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::classifier::{self, ClassifiedInput, ColumnRole};
use crate::config::Config;
use crate::fs_atomic::{self, FsError};
use crate::models::{ExpectedRow, PageRecord};
use crate::reports::csv_escape;
use crate::text_norm::{jaccard, normalize_text, prefix_match};
use crate::url_norm::normalize_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchVerdict {
    Correct,
    DescMismatchOnly,
    OtherMismatch,
    NotFound,
    Ambiguous,
}

impl MatchVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchVerdict::Correct => "correct",
            MatchVerdict::DescMismatchOnly => "desc-mismatch-only",
            MatchVerdict::OtherMismatch => "other-mismatch",
            MatchVerdict::NotFound => "not-found",
            MatchVerdict::Ambiguous => "ambiguous",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub expected: ExpectedRow,
    pub verdict: MatchVerdict,
    pub matched_url: Option<String>,
    pub title_length: usize,
    pub title_over_limit: bool,
    pub description_length: usize,
    pub description_over_limit: bool,
}

/// Compare every expected row against the crawled page set.
///
/// A single non-URL input column gets its role re-checked against the fetched
/// pages first; title matching then runs exact, prefix, fuzzy, in that order.
pub fn compare(
    input: &ClassifiedInput,
    pages: &[PageRecord],
    keep_page_param: bool,
) -> Vec<ComparisonRow> {
    let titles: Vec<String> = pages.iter().map(|p| p.title.clone()).collect();
    let descriptions: Vec<String> = pages.iter().map(|p| p.description.clone()).collect();
    let roles = classifier::refine_single_text_role(input, &titles, &descriptions);
    let expected = classifier::expected_rows_with(input, &roles);

    let by_url: HashMap<String, &PageRecord> =
        pages.iter().map(|p| (p.url.clone(), p)).collect();

    expected
        .iter()
        .map(|row| compare_row(row, pages, &by_url, keep_page_param))
        .collect()
}

fn compare_row(
    expected: &ExpectedRow,
    pages: &[PageRecord],
    by_url: &HashMap<String, &PageRecord>,
    keep_page_param: bool,
) -> ComparisonRow {
    let (verdict, matched) = if let Some(raw_url) = &expected.expected_url {
        match normalize_url(raw_url, keep_page_param).and_then(|u| by_url.get(&u).copied()) {
            Some(page) => (verdict_against(expected, page, false), Some(page)),
            None => (MatchVerdict::NotFound, None),
        }
    } else {
        match match_by_text(expected, pages) {
            // The matching tier already vouched for the title; only the
            // description can still disagree.
            TextMatch::One(page) => (verdict_against(expected, page, true), Some(page)),
            TextMatch::Many => (MatchVerdict::Ambiguous, None),
            TextMatch::None => (MatchVerdict::NotFound, None),
        }
    };

    // Length stamps describe the page when one matched, else the input row.
    let (title, description) = match matched {
        Some(page) => (page.title.clone(), page.description.clone()),
        None => (
            expected.expected_title.clone().unwrap_or_default(),
            expected.expected_description.clone().unwrap_or_default(),
        ),
    };
    let title_length = title.chars().count();
    let description_length = description.chars().count();

    ComparisonRow {
        expected: expected.clone(),
        verdict,
        matched_url: matched.map(|p| p.url.clone()),
        title_length,
        title_over_limit: title_length > Config::TITLE_CHAR_LIMIT,
        description_length,
        description_over_limit: description_length > Config::DESCRIPTION_CHAR_LIMIT,
    }
}

enum TextMatch<'a> {
    One(&'a PageRecord),
    Many,
    None,
}

/// Three-tier title matching: exact normalized equality, first-K-token
/// prefix, Jaccard fuzzy. More than one hit in the deciding tier is
/// ambiguous. Description-only rows match on exact description equality.
fn match_by_text<'a>(expected: &ExpectedRow, pages: &'a [PageRecord]) -> TextMatch<'a> {
    if let Some(title) = &expected.expected_title {
        let wanted = normalize_text(title);

        let exact: Vec<&PageRecord> = pages
            .iter()
            .filter(|p| p.title_normalized == wanted)
            .collect();
        match exact.len() {
            1 => return TextMatch::One(exact[0]),
            n if n > 1 => return TextMatch::Many,
            _ => {}
        }

        let prefix: Vec<&PageRecord> = pages
            .iter()
            .filter(|p| prefix_match(&p.title, title, Config::TITLE_PREFIX_TOKENS))
            .collect();
        match prefix.len() {
            1 => return TextMatch::One(prefix[0]),
            n if n > 1 => return TextMatch::Many,
            _ => {}
        }

        let fuzzy: Vec<&PageRecord> = pages
            .iter()
            .filter(|p| jaccard(&p.title, title) >= Config::TITLE_FUZZY_THRESHOLD)
            .collect();
        return match fuzzy.len() {
            1 => TextMatch::One(fuzzy[0]),
            0 => TextMatch::None,
            _ => TextMatch::Many,
        };
    }

    if let Some(description) = &expected.expected_description {
        let wanted = normalize_text(description);
        let hits: Vec<&PageRecord> = pages
            .iter()
            .filter(|p| normalize_text(&p.description) == wanted)
            .collect();
        return match hits.len() {
            1 => TextMatch::One(hits[0]),
            0 => TextMatch::None,
            _ => TextMatch::Many,
        };
    }

    TextMatch::None
}

/// Verdict once a page is pinned: correct, a description-only mismatch, or
/// some other mismatch.
fn verdict_against(expected: &ExpectedRow, page: &PageRecord, title_vouched: bool) -> MatchVerdict {
    let title_ok = title_vouched
        || expected
            .expected_title
            .as_ref()
            .map(|t| normalize_text(t) == page.title_normalized)
            .unwrap_or(true);
    let desc_ok = expected
        .expected_description
        .as_ref()
        .map(|d| normalize_text(d) == normalize_text(&page.description))
        .unwrap_or(true);

    match (title_ok, desc_ok) {
        (true, true) => MatchVerdict::Correct,
        (true, false) => MatchVerdict::DescMismatchOnly,
        _ => MatchVerdict::OtherMismatch,
    }
}

/// Pages found on the site that the input never listed, keyed by title or by
/// the (title, description) pair.
pub fn extras<'a>(
    input: &ClassifiedInput,
    pages: &'a [PageRecord],
    pair_key: bool,
) -> Vec<&'a PageRecord> {
    let roles = &input.shape.inferred_roles;
    let known: std::collections::HashSet<(String, String)> = input
        .rows
        .iter()
        .map(|row| {
            let title = row
                .get_role(ColumnRole::Title, roles)
                .map(normalize_text)
                .unwrap_or_default();
            let desc = if pair_key {
                row.get_role(ColumnRole::Description, roles)
                    .map(normalize_text)
                    .unwrap_or_default()
            } else {
                String::new()
            };
            (title, desc)
        })
        .collect();

    pages
        .iter()
        .filter(|page| {
            let key = (
                page.title_normalized.clone(),
                if pair_key {
                    normalize_text(&page.description)
                } else {
                    String::new()
                },
            );
            !page.title_normalized.is_empty() && !known.contains(&key)
        })
        .collect()
}

pub async fn write_comparison(path: &Path, rows: &[ComparisonRow]) -> Result<(), FsError> {
    let mut body = String::from(
        "expected_url,expected_title,expected_description,verdict,matched_url,title_length,title_over_60,description_length,description_over_160\n",
    );
    for row in rows {
        body.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            csv_escape(row.expected.expected_url.as_deref().unwrap_or("")),
            csv_escape(row.expected.expected_title.as_deref().unwrap_or("")),
            csv_escape(row.expected.expected_description.as_deref().unwrap_or("")),
            row.verdict.as_str(),
            csv_escape(row.matched_url.as_deref().unwrap_or("")),
            row.title_length,
            row.title_over_limit,
            row.description_length,
            row.description_over_limit,
        ));
    }
    fs_atomic::write_atomic(path, body.as_bytes()).await
}

pub async fn write_extras(path: &Path, pages: &[&PageRecord]) -> Result<(), FsError> {
    let mut body = String::from("url,title,description\n");
    for page in pages {
        body.push_str(&format!(
            "{},{},{}\n",
            csv_escape(&page.url),
            csv_escape(&page.title),
            csv_escape(&page.description),
        ));
    }
    fs_atomic::write_atomic(path, body.as_bytes()).await
}
