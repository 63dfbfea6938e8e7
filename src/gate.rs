//! Output gating: which selected reports are legal for the classified input.

use serde::{Deserialize, Serialize};

use crate::classifier::{ColumnRole, InputShape};
use crate::models::OutputKind;

/// One rejected output with the reason, surfaced to the user and enforced on
/// apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateError {
    pub key: OutputKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub ok: bool,
    pub errors: Vec<GateError>,
}

/// Validate the selected outputs against the input shape.
///
/// `urls`, `site_catalog`, `internal_links`, and `tree` are always allowed.
/// The existence report needs input URLs to test; the comparison report needs
/// expected titles and/or descriptions to compare against.
pub fn validate(shape: &InputShape, selected: &[OutputKind]) -> GateResult {
    let mut errors = Vec::new();

    for output in selected {
        match output {
            OutputKind::ExistenceCsv => {
                let has_urls = shape.exists
                    && (shape.first_column_url_share >= 0.6 || shape.has_role(ColumnRole::Url));
                if !has_urls {
                    errors.push(GateError {
                        key: *output,
                        reason: if shape.exists {
                            "first column must look like URLs".to_string()
                        } else {
                            "requires an input file of URLs".to_string()
                        },
                    });
                }
            }
            OutputKind::ComparisonCsv => {
                let has_text = shape.exists
                    && (shape.has_role(ColumnRole::Title)
                        || shape.has_role(ColumnRole::Description));
                if !has_text {
                    errors.push(GateError {
                        key: *output,
                        reason: if shape.exists {
                            "input must provide title and/or description columns".to_string()
                        } else {
                            "requires an input file with title and/or description columns"
                                .to_string()
                        },
                    });
                }
            }
            OutputKind::Urls
            | OutputKind::SiteCatalog
            | OutputKind::InternalLinks
            | OutputKind::Tree => {}
        }
    }

    GateResult {
        ok: errors.is_empty(),
        errors,
    }
}

/// Every output the shape permits; used when a run starts from the CLI with
/// no applied Control Channel config.
pub fn permitted(shape: &InputShape) -> Vec<OutputKind> {
    OutputKind::ALL
        .into_iter()
        .filter(|kind| validate(shape, &[*kind]).ok)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_bytes;

    #[test]
    fn test_ungated_outputs_always_pass() {
        let shape = InputShape::absent();
        let result = validate(
            &shape,
            &[
                OutputKind::Urls,
                OutputKind::SiteCatalog,
                OutputKind::InternalLinks,
                OutputKind::Tree,
            ],
        );
        assert!(result.ok);
    }

    #[test]
    fn test_no_input_rejects_both_gated_outputs() {
        let shape = InputShape::absent();
        let result = validate(&shape, &[OutputKind::ExistenceCsv, OutputKind::ComparisonCsv]);
        assert!(!result.ok);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_text_input_rejects_existence_with_url_reason() {
        let mut text = String::new();
        for _ in 0..10 {
            text.push_str("Home Page,Welcome to our site.\n");
        }
        let input = classify_bytes(text.as_bytes());

        let result = validate(
            &input.shape,
            &[OutputKind::ComparisonCsv, OutputKind::ExistenceCsv],
        );
        assert!(!result.ok);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].key, OutputKind::ExistenceCsv);
        assert_eq!(result.errors[0].reason, "first column must look like URLs");
    }

    #[test]
    fn test_url_only_input_rejects_comparison() {
        let mut text = String::new();
        for i in 0..10 {
            text.push_str(&format!("https://a.test/{}\n", i));
        }
        let input = classify_bytes(text.as_bytes());

        let result = validate(&input.shape, &[OutputKind::ComparisonCsv]);
        assert!(!result.ok);
        assert!(result.errors[0].reason.contains("title and/or description"));
    }

    #[test]
    fn test_full_input_permits_everything() {
        let text = "https://a.test/1,Home,Welcome\nhttps://a.test/2,About,Team\n";
        let input = classify_bytes(text.as_bytes());
        assert_eq!(permitted(&input.shape).len(), OutputKind::ALL.len());
    }
}
