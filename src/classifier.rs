//! Input-shape classification: delimiter sniffing, column-role inference,
//! and run-mode selection from an optional delimited input file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::{ExpectedRow, RunMode};
use crate::url_norm::looks_like_url;

const DELIMITER_CANDIDATES: [char; 3] = [',', '\t', ';'];
/// Second-column average length at or above which a text column reads as a
/// description rather than a title.
const DESCRIPTION_LENGTH_CUTOFF: f64 = 120.0;
const URL_SHARE_HIGH: f64 = 0.6;
const URL_SHARE_LOW: f64 = 0.3;

/// Semantic role of an input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Url,
    Title,
    Description,
}

/// Shape derived once per run from the input file bytes. A total function of
/// the bytes: same input, same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputShape {
    pub exists: bool,
    pub column_count: usize,
    pub first_column_url_share: f64,
    pub first_row_is_url: bool,
    pub inferred_roles: Vec<ColumnRole>,
}

impl InputShape {
    pub fn absent() -> Self {
        Self {
            exists: false,
            column_count: 0,
            first_column_url_share: 0.0,
            first_row_is_url: false,
            inferred_roles: Vec::new(),
        }
    }

    pub fn has_role(&self, role: ColumnRole) -> bool {
        self.inferred_roles.contains(&role)
    }
}

/// One input row, padded to the table width. Cells are addressable by
/// position or by inferred role.
#[derive(Debug, Clone)]
pub struct Row {
    cells: Vec<String>,
}

impl Row {
    pub fn get(&self, index: usize) -> &str {
        self.cells.get(index).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn get_role(&self, role: ColumnRole, roles: &[ColumnRole]) -> Option<&str> {
        roles
            .iter()
            .position(|&r| r == role)
            .map(|i| self.get(i))
            .filter(|s| !s.is_empty())
    }
}

/// Classified input: the shape plus the padded rows it was derived from.
#[derive(Debug, Clone)]
pub struct ClassifiedInput {
    pub shape: InputShape,
    pub rows: Vec<Row>,
}

/// Classify an optional input file. Missing or empty input yields the absent
/// shape and `no-input` mode downstream.
pub fn classify_file(path: Option<&Path>) -> ClassifiedInput {
    match path {
        Some(p) => match std::fs::read(p) {
            Ok(bytes) => classify_bytes(&bytes),
            Err(_) => ClassifiedInput {
                shape: InputShape::absent(),
                rows: Vec::new(),
            },
        },
        None => ClassifiedInput {
            shape: InputShape::absent(),
            rows: Vec::new(),
        },
    }
}

pub fn classify_bytes(bytes: &[u8]) -> ClassifiedInput {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .collect();

    if lines.is_empty() {
        return ClassifiedInput {
            shape: InputShape::absent(),
            rows: Vec::new(),
        };
    }

    let delimiter = detect_delimiter(&lines);
    let mut split_rows: Vec<Vec<String>> = lines
        .iter()
        .map(|l| l.split(delimiter).map(|c| c.trim().to_string()).collect())
        .collect();

    let width = split_rows.iter().map(|r| r.len()).max().unwrap_or(1);
    for row in &mut split_rows {
        row.resize(width, String::new());
    }
    let rows: Vec<Row> = split_rows.into_iter().map(|cells| Row { cells }).collect();

    let first_column_url_share = column_url_share(&rows, 0);
    let first_row_is_url = looks_like_url(rows[0].get(0));
    let inferred_roles = infer_roles(&rows, width, first_column_url_share);

    ClassifiedInput {
        shape: InputShape {
            exists: true,
            column_count: width,
            first_column_url_share,
            first_row_is_url,
            inferred_roles,
        },
        rows,
    }
}

/// Pick the delimiter yielding the highest variance of per-line column
/// counts over the sample window. A spuriously matching delimiter tends to
/// give uniform one-column splits; ties break toward the higher mean count.
fn detect_delimiter(lines: &[&str]) -> char {
    let sample: Vec<&str> = lines
        .iter()
        .take(Config::CLASSIFIER_SAMPLE_LINES)
        .copied()
        .collect();

    let mut best = (',', f64::MIN, f64::MIN);
    for candidate in DELIMITER_CANDIDATES {
        let counts: Vec<f64> = sample
            .iter()
            .map(|l| l.split(candidate).count() as f64)
            .collect();
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance =
            counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        if variance > best.1 || (variance == best.1 && mean > best.2) {
            best = (candidate, variance, mean);
        }
    }
    best.0
}

fn column_url_share(rows: &[Row], index: usize) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let hits = rows.iter().filter(|r| looks_like_url(r.get(index))).count();
    hits as f64 / rows.len() as f64
}

fn column_avg_len(rows: &[Row], index: usize) -> f64 {
    let filled: Vec<usize> = rows
        .iter()
        .map(|r| r.get(index).chars().count())
        .filter(|&n| n > 0)
        .collect();
    if filled.is_empty() {
        return 0.0;
    }
    filled.iter().sum::<usize>() as f64 / filled.len() as f64
}

fn infer_roles(rows: &[Row], width: usize, first_share: f64) -> Vec<ColumnRole> {
    match width {
        0 => Vec::new(),
        1 => {
            if first_share >= URL_SHARE_HIGH {
                vec![ColumnRole::Url]
            } else if column_avg_len(rows, 0) < DESCRIPTION_LENGTH_CUTOFF {
                vec![ColumnRole::Title]
            } else {
                vec![ColumnRole::Description]
            }
        }
        2 => {
            let second_share = column_url_share(rows, 1);
            if first_share >= URL_SHARE_HIGH && second_share < URL_SHARE_LOW {
                if column_avg_len(rows, 1) < DESCRIPTION_LENGTH_CUTOFF {
                    vec![ColumnRole::Url, ColumnRole::Title]
                } else {
                    vec![ColumnRole::Url, ColumnRole::Description]
                }
            } else if first_share < URL_SHARE_LOW && second_share < URL_SHARE_LOW {
                vec![ColumnRole::Title, ColumnRole::Description]
            } else {
                Vec::new()
            }
        }
        _ => vec![ColumnRole::Url, ColumnRole::Title, ColumnRole::Description],
    }
}

/// Crawl mode as a function of the shape.
pub fn run_mode(shape: &InputShape) -> RunMode {
    if !shape.exists {
        return RunMode::NoInput;
    }
    let first_is_url = shape.inferred_roles.first() == Some(&ColumnRole::Url);
    if shape.column_count >= 3 || first_is_url {
        return RunMode::ExplicitUrls;
    }
    if shape.column_count == 1 {
        return RunMode::SingleText;
    }
    RunMode::Discovery
}

/// Materialize expected rows from the classified input.
pub fn expected_rows(input: &ClassifiedInput) -> Vec<ExpectedRow> {
    expected_rows_with(input, &input.shape.inferred_roles)
}

/// Expected rows under an explicit role assignment (used after the
/// single-column refinement).
pub fn expected_rows_with(input: &ClassifiedInput, roles: &[ColumnRole]) -> Vec<ExpectedRow> {
    input
        .rows
        .iter()
        .map(|row| ExpectedRow {
            expected_url: row.get_role(ColumnRole::Url, roles).map(str::to_string),
            expected_title: row.get_role(ColumnRole::Title, roles).map(str::to_string),
            expected_description: row
                .get_role(ColumnRole::Description, roles)
                .map(str::to_string),
        })
        .filter(|r| {
            r.expected_url.is_some() || r.expected_title.is_some() || r.expected_description.is_some()
        })
        .collect()
}

/// The URLs an explicit-urls input drives, in file order.
pub fn input_urls(input: &ClassifiedInput) -> Vec<String> {
    let roles = &input.shape.inferred_roles;
    input
        .rows
        .iter()
        .filter_map(|row| row.get_role(ColumnRole::Url, roles))
        .map(str::to_string)
        .collect()
}

/// Post-fetch refinement for a single non-URL column: probe the first rows
/// against known page titles and descriptions, and flip the role when one
/// side dominates by at least two hits.
pub fn refine_single_text_role(
    input: &ClassifiedInput,
    known_titles: &[String],
    known_descriptions: &[String],
) -> Vec<ColumnRole> {
    use crate::text_norm::normalize_text;

    let roles = input.shape.inferred_roles.clone();
    if roles.len() != 1 || roles[0] == ColumnRole::Url {
        return roles;
    }

    let titles: std::collections::HashSet<String> =
        known_titles.iter().map(|t| normalize_text(t)).collect();
    let descriptions: std::collections::HashSet<String> =
        known_descriptions.iter().map(|d| normalize_text(d)).collect();

    let mut title_hits = 0i32;
    let mut desc_hits = 0i32;
    for row in input.rows.iter().take(8) {
        let cell = normalize_text(row.get(0));
        if cell.is_empty() {
            continue;
        }
        if titles.contains(&cell) {
            title_hits += 1;
        }
        if descriptions.contains(&cell) {
            desc_hits += 1;
        }
    }

    if title_hits - desc_hits >= 2 {
        vec![ColumnRole::Title]
    } else if desc_hits - title_hits >= 2 {
        vec![ColumnRole::Description]
    } else {
        roles
    }
}
