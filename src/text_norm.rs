//! Text normalization and matching helpers for the comparison reports.

/// Canonical form used for title/description equality: lowercase, smart
/// quotes to ASCII apostrophes, whitespace collapsed, trimmed. Idempotent.
pub fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        let ch = match ch {
            '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{02BC}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201F}' => '"',
            c => c,
        };
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Whitespace-delimited tokens of the normalized form.
pub fn tokens(s: &str) -> Vec<String> {
    normalize_text(s)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// First-`k`-token prefix equality over normalized text. Falls back to full
/// equality when either side is shorter than `k` tokens.
pub fn prefix_match(a: &str, b: &str, k: usize) -> bool {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return false;
    }
    if ta.len() < k || tb.len() < k {
        return ta == tb;
    }
    ta[..k] == tb[..k]
}

/// Jaccard similarity over normalized token sets.
pub fn jaccard(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let sa: HashSet<String> = tokens(a).into_iter().collect();
    let sb: HashSet<String> = tokens(b).into_iter().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_and_lowers() {
        assert_eq!(normalize_text("  Hello\t\n WORLD  "), "hello world");
        assert_eq!(normalize_text("It\u{2019}s \u{201C}Fine\u{201D}"), "it's \"fine\"");
    }

    #[test]
    fn test_normalize_idempotent() {
        for s in ["  A  B ", "It\u{2019}s", "MiXeD   Case"] {
            let once = normalize_text(s);
            assert_eq!(normalize_text(&once), once);
        }
    }

    #[test]
    fn test_prefix_match() {
        assert!(prefix_match(
            "Getting Started With The Platform",
            "getting started with the API",
            4
        ));
        assert!(!prefix_match("Getting Started", "Getting Going", 4));
        assert!(prefix_match("One Two", "one two", 4));
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard("a b c", "a b c") - 1.0).abs() < f64::EPSILON);
        assert!((jaccard("a b c d", "a b x y") - (2.0 / 6.0)).abs() < 1e-9);
        assert_eq!(jaccard("", "a"), 0.0);
    }
}
