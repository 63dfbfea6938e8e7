//! Merge per-worker partial artifacts into the final data set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::fs_atomic::{self, FsError};
use crate::models::{ExistenceRecord, PageRecord};

/// Everything the report writers consume.
#[derive(Debug, Default)]
pub struct Merged {
    pub urls: Vec<String>,
    pub pages: Vec<PageRecord>,
    pub edge_count: u64,
    pub existence: Vec<ExistenceRecord>,
}

/// Merge all worker partials under `out_dir`.
///
/// URL parts concatenate line-by-line and reduce to a set; existence JSON
/// parts merge into a map keyed by input URL, last writer wins; internal-link
/// parts stay per-worker but are optionally concatenated for convenience.
pub async fn merge_partials(
    out_dir: &Path,
    workers: usize,
    concat_links: bool,
) -> Result<Merged, FsError> {
    let mut merged = Merged::default();

    // URL lists: union, first-seen order, then sorted for determinism.
    let mut seen: HashSet<String> = HashSet::new();
    for k in 0..workers {
        let path = out_dir.join(format!("urls-final.part{}.json", k));
        let data = fs_atomic::read_or_empty(&path).await?;
        for line in String::from_utf8_lossy(&data).lines() {
            let url = line.trim();
            if !url.is_empty() && seen.insert(url.to_string()) {
                merged.urls.push(url.to_string());
            }
        }
    }
    merged.urls.sort();

    // Fetch caches: per-worker maps keyed by URL; workers own disjoint URLs,
    // so a plain union suffices (last writer wins on overlap).
    let mut pages: HashMap<String, PageRecord> = HashMap::new();
    for k in 0..workers {
        let path = out_dir.join(format!("fetch-cache.part{}.json", k));
        let data = fs_atomic::read_or_empty(&path).await?;
        if data.is_empty() {
            continue;
        }
        match serde_json::from_slice::<HashMap<String, PageRecord>>(&data) {
            Ok(part) => pages.extend(part),
            Err(e) => tracing::warn!(part = k, error = %e, "unreadable fetch-cache part"),
        }
    }
    let mut page_list: Vec<PageRecord> = pages.into_values().collect();
    page_list.sort_by(|a, b| a.url.cmp(&b.url));
    merged.pages = page_list;

    // Internal links: count always, concatenate when asked.
    let mut concatenated = String::new();
    for k in 0..workers {
        let path = out_dir.join(format!("internal-links.part{}.ndjson", k));
        let data = fs_atomic::read_or_empty(&path).await?;
        let text = String::from_utf8_lossy(&data);
        merged.edge_count += text.lines().filter(|l| !l.trim().is_empty()).count() as u64;
        if concat_links {
            concatenated.push_str(&text);
        }
    }
    if concat_links && !concatenated.is_empty() {
        fs_atomic::write_atomic(
            &out_dir.join("internal-links.ndjson"),
            concatenated.as_bytes(),
        )
        .await?;
    }

    // Existence: NDJSON parts into a map keyed by input_url.
    let mut existence: BTreeMap<String, ExistenceRecord> = BTreeMap::new();
    for k in 0..workers {
        let path = out_dir.join(format!("url-existence.part{}.json", k));
        let data = fs_atomic::read_or_empty(&path).await?;
        for line in String::from_utf8_lossy(&data).lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExistenceRecord>(line) {
                Ok(record) => {
                    existence.insert(record.input_url.clone(), record);
                }
                Err(e) => tracing::warn!(part = k, error = %e, "bad existence line"),
            }
        }
    }
    merged.existence = existence.into_values().collect();

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkKind;
    use tempfile::TempDir;

    fn record(url: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            title: "T".to_string(),
            description: String::new(),
            title_normalized: "t".to_string(),
            links: Vec::new(),
            last_fetched: 1,
        }
    }

    #[tokio::test]
    async fn test_url_parts_reduce_to_set() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("urls-final.part0.json"),
            "https://a.test/x\nhttps://a.test/y\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("urls-final.part1.json"),
            "https://a.test/y\nhttps://a.test/z\n",
        )
        .unwrap();

        let merged = merge_partials(dir.path(), 2, false).await.unwrap();
        assert_eq!(
            merged.urls,
            vec!["https://a.test/x", "https://a.test/y", "https://a.test/z"]
        );
    }

    #[tokio::test]
    async fn test_cache_and_edges_merge() {
        let dir = TempDir::new().unwrap();

        let mut part0 = HashMap::new();
        part0.insert("https://a.test/x".to_string(), record("https://a.test/x"));
        std::fs::write(
            dir.path().join("fetch-cache.part0.json"),
            serde_json::to_vec(&part0).unwrap(),
        )
        .unwrap();

        let edge = crate::models::EdgeRecord {
            page_url: "https://a.test/x".to_string(),
            link_url: "https://a.test/y".to_string(),
            text: "Y".to_string(),
            kind: LinkKind::A,
        };
        std::fs::write(
            dir.path().join("internal-links.part0.ndjson"),
            format!("{}\n", serde_json::to_string(&edge).unwrap()),
        )
        .unwrap();

        let merged = merge_partials(dir.path(), 1, true).await.unwrap();
        assert_eq!(merged.pages.len(), 1);
        assert_eq!(merged.edge_count, 1);
        assert!(dir.path().join("internal-links.ndjson").exists());
    }

    #[tokio::test]
    async fn test_existence_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let early = ExistenceRecord {
            input_url: "https://a.test/x".to_string(),
            exists: false,
            http_status: 503,
            final_url: String::new(),
        };
        let late = ExistenceRecord {
            input_url: "https://a.test/x".to_string(),
            exists: true,
            http_status: 200,
            final_url: "https://a.test/x".to_string(),
        };
        std::fs::write(
            dir.path().join("url-existence.part0.json"),
            format!(
                "{}\n{}\n",
                serde_json::to_string(&early).unwrap(),
                serde_json::to_string(&late).unwrap()
            ),
        )
        .unwrap();

        let merged = merge_partials(dir.path(), 1, false).await.unwrap();
        assert_eq!(merged.existence.len(), 1);
        assert!(merged.existence[0].exists);
    }
}
