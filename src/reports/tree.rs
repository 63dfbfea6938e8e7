//! ASCII tree renders of the discovered URL paths.

use std::collections::BTreeMap;

use crate::url_norm::path_segments;

#[derive(Default)]
struct Node {
    children: BTreeMap<String, Node>,
    /// URLs terminating at this node.
    hits: usize,
}

fn build(urls: &[String]) -> Node {
    let mut root = Node::default();
    for url in urls {
        let mut node = &mut root;
        for segment in path_segments(url) {
            node = node.children.entry(segment).or_default();
        }
        node.hits += 1;
    }
    root
}

/// Hierarchical ASCII render of URL path segments.
pub fn render_tree(urls: &[String]) -> String {
    let root = build(urls);
    let mut out = String::from("/\n");
    render_children(&root, "", &mut out);
    out
}

fn render_children(node: &Node, indent: &str, out: &mut String) {
    let count = node.children.len();
    for (i, (segment, child)) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        out.push_str(indent);
        out.push_str(connector);
        out.push_str(segment);
        if child.hits > 1 {
            out.push_str(&format!(" ({})", child.hits));
        }
        out.push('\n');

        let child_indent = format!("{}{}", indent, if last { "    " } else { "│   " });
        render_children(child, &child_indent, out);
    }
}

/// Markdown listing of sample URLs per first-level branch.
pub fn render_examples(urls: &[String], max_per_branch: usize) -> String {
    let mut by_branch: BTreeMap<String, Vec<&String>> = BTreeMap::new();
    for url in urls {
        let segments = path_segments(url);
        let branch = segments
            .first()
            .map(|s| format!("/{}", s))
            .unwrap_or_else(|| "/".to_string());
        by_branch.entry(branch).or_default().push(url);
    }

    let mut out = String::from("# Sample URLs by section\n");
    for (branch, mut samples) in by_branch {
        samples.sort();
        out.push_str(&format!("\n## {}\n\n", branch));
        for url in samples.iter().take(max_per_branch) {
            out.push_str(&format!("- {}\n", url));
        }
        if samples.len() > max_per_branch {
            out.push_str(&format!("- … {} more\n", samples.len() - max_per_branch));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> Vec<String> {
        [
            "https://a.test/",
            "https://a.test/docs/intro",
            "https://a.test/docs/api/auth",
            "https://a.test/docs/api/errors",
            "https://a.test/pricing",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn test_tree_shape() {
        let rendered = render_tree(&urls());
        let expected = "\
/
├── docs
│   ├── api
│   │   ├── auth
│   │   └── errors
│   └── intro
└── pricing
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_examples_grouped_by_first_segment() {
        let rendered = render_examples(&urls(), 2);
        assert!(rendered.contains("## /docs"));
        assert!(rendered.contains("## /pricing"));
        assert!(rendered.contains("- https://a.test/docs/api/auth"));
        // Three docs URLs, capped at two samples.
        assert!(rendered.contains("… 1 more"));
    }

    #[test]
    fn test_repeated_leaf_counts() {
        let urls: Vec<String> = vec![
            "https://a.test/blog".to_string(),
            "https://a.test/blog".to_string(),
        ];
        let rendered = render_tree(&urls);
        assert!(rendered.contains("blog (2)"));
    }
}
