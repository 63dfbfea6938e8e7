//! End-to-end coverage of the coordination core: frontier round-trips, claim
//! exclusivity, work stealing, classifier/gate flows, merge, and reports.

use std::collections::HashSet;

use tempfile::TempDir;

use metacrawl::classifier::{self, ColumnRole};
use metacrawl::frontier::Frontier;
use metacrawl::gate;
use metacrawl::models::{ExistenceRecord, OutputKind, PageRecord};
use metacrawl::orchestration::merge::merge_partials;
use metacrawl::reports::{self, ReportInputs};
use metacrawl::{ClaimLedger, ClaimOutcome, Tuning};

fn accept_all(_: &str) -> bool {
    true
}

fn open_pair(dir: &TempDir, buckets: usize) -> (Frontier, ClaimLedger) {
    let tuning = Tuning::default();
    let frontier = Frontier::open(&dir.path().join("frontier"), buckets, &tuning).unwrap();
    let ledger = ClaimLedger::open(&dir.path().join("disco-locks"), &tuning).unwrap();
    (frontier, ledger)
}

#[tokio::test]
async fn frontier_drain_marks_every_url_done() {
    let dir = TempDir::new().unwrap();
    let (frontier, ledger) = open_pair(&dir, 8);

    let urls: Vec<String> = (0..50)
        .map(|i| format!("https://site.test/page/{}", i))
        .collect();
    frontier.seed(&urls).await.unwrap();

    let mut drained = HashSet::new();
    while let Some((url, ticket)) = frontier
        .claim_next_any(0, &ledger, &accept_all)
        .await
        .unwrap()
    {
        ticket.complete().await.unwrap();
        drained.insert(url);
    }

    assert_eq!(drained.len(), 50);
    assert_eq!(ledger.done_count(), 50);
    let snap = frontier.snapshot(&ledger);
    assert_eq!(snap.pending_bytes, 0);
    assert_eq!(snap.claim_lock_count, 0);
}

#[tokio::test]
async fn rerun_against_done_ledger_claims_nothing() {
    let dir = TempDir::new().unwrap();
    let (frontier, ledger) = open_pair(&dir, 4);

    let urls: Vec<String> = (0..10)
        .map(|i| format!("https://site.test/{}", i))
        .collect();
    frontier.seed(&urls).await.unwrap();
    while let Some((_, ticket)) = frontier
        .claim_next_any(0, &ledger, &accept_all)
        .await
        .unwrap()
    {
        ticket.complete().await.unwrap();
    }

    // Second discovery round re-appends the same URLs.
    frontier.append(&urls).await.unwrap();
    let again = frontier
        .claim_next_any(0, &ledger, &accept_all)
        .await
        .unwrap();
    assert!(again.is_none(), "a .done ledger must block reclaims");
}

#[tokio::test]
async fn work_stealing_drains_a_hot_bucket() {
    let dir = TempDir::new().unwrap();
    let (frontier, ledger) = open_pair(&dir, 8);
    frontier.seed(&[]).await.unwrap();

    // Pile 50 URLs into bucket 0 directly, simulating a skewed discovery.
    let mut body = String::new();
    for i in 0..50 {
        body.push_str(&format!("https://site.test/hot/{}\n", i));
    }
    std::fs::write(dir.path().join("frontier/bucket.0.ndjson"), body).unwrap();

    // A worker whose home bucket is 3 steals everything.
    let mut stolen = 0;
    while let Some((_, ticket)) = frontier
        .claim_next_any(3, &ledger, &accept_all)
        .await
        .unwrap()
    {
        ticket.complete().await.unwrap();
        stolen += 1;
    }
    assert_eq!(stolen, 50);
}

#[tokio::test]
async fn claim_is_exclusive_across_handles() {
    let dir = TempDir::new().unwrap();
    let tuning = Tuning::default();
    // Two ledger handles over the same directory, as two processes would have.
    let a = ClaimLedger::open(&dir.path().join("disco-locks"), &tuning).unwrap();
    let b = ClaimLedger::open(&dir.path().join("disco-locks"), &tuning).unwrap();

    let url = "https://site.test/contested";
    let ticket = match a.try_claim(url).await.unwrap() {
        ClaimOutcome::Claimed(t) => t,
        _ => panic!("first claim must succeed"),
    };
    assert!(matches!(
        b.try_claim(url).await.unwrap(),
        ClaimOutcome::Contended
    ));

    ticket.release().await;
    assert!(matches!(
        b.try_claim(url).await.unwrap(),
        ClaimOutcome::Claimed(_)
    ));
}

#[test]
fn classifier_shape_drives_gate_decisions() {
    // Scenario: two text columns, ten identical rows.
    let mut text = String::new();
    for _ in 0..10 {
        text.push_str("Home Page,Welcome to our site.\n");
    }
    let input = classifier::classify_bytes(text.as_bytes());

    assert_eq!(input.shape.column_count, 2);
    assert_eq!(input.shape.first_column_url_share, 0.0);
    assert_eq!(
        input.shape.inferred_roles,
        vec![ColumnRole::Title, ColumnRole::Description]
    );

    let result = gate::validate(
        &input.shape,
        &[OutputKind::ComparisonCsv, OutputKind::ExistenceCsv],
    );
    assert!(!result.ok);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].key, OutputKind::ExistenceCsv);
    assert_eq!(result.errors[0].reason, "first column must look like URLs");
}

#[test]
fn gate_rejects_comparison_for_url_only_input() {
    let mut text = String::new();
    for i in 0..10 {
        text.push_str(&format!("https://site.test/{}\n", i));
    }
    let input = classifier::classify_bytes(text.as_bytes());
    assert_eq!(input.shape.inferred_roles, vec![ColumnRole::Url]);

    let result = gate::validate(&input.shape, &[OutputKind::ComparisonCsv]);
    assert!(!result.ok);
    assert!(result.errors[0].reason.contains("title and/or description"));
}

#[tokio::test]
async fn merged_url_list_is_the_deduplicated_union() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("urls-final.part0.json"),
        "https://site.test/a\nhttps://site.test/b\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("urls-final.part1.json"),
        "https://site.test/b\nhttps://site.test/c\nhttps://site.test/a\n",
    )
    .unwrap();

    let merged = merge_partials(dir.path(), 2, false).await.unwrap();
    assert_eq!(
        merged.urls,
        vec![
            "https://site.test/a",
            "https://site.test/b",
            "https://site.test/c"
        ]
    );
}

#[test]
fn normalization_round_trips() {
    for raw in [
        "https://Site.Test/Path/?utm_source=mail&page=2#frag",
        "https://site.test/",
        "https://site.test/a?q=1",
    ] {
        let once = metacrawl::url_norm::normalize_url(raw, false).unwrap();
        assert_eq!(
            metacrawl::url_norm::normalize_url(&once, false).unwrap(),
            once
        );
    }

    for s in ["  Mixed \u{201C}Case\u{201D}  Text ", "plain", ""] {
        let once = metacrawl::text_norm::normalize_text(s);
        assert_eq!(metacrawl::text_norm::normalize_text(&once), once);
    }
}

fn page(url: &str, title: &str, description: &str) -> PageRecord {
    PageRecord {
        url: url.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        title_normalized: metacrawl::text_norm::normalize_text(title),
        links: Vec::new(),
        last_fetched: 0,
    }
}

#[tokio::test]
async fn full_report_set_lands_on_disk() {
    let dir = TempDir::new().unwrap();
    let input = classifier::classify_bytes(
        b"https://site.test/,Home,Welcome home.\nhttps://site.test/about,About,The team.\n",
    );
    let pages = vec![
        page("https://site.test/", "Home", "Welcome home."),
        page("https://site.test/about", "About", "A newer description."),
    ];
    let urls: Vec<String> = pages.iter().map(|p| p.url.clone()).collect();
    let existence = vec![ExistenceRecord {
        input_url: "https://site.test/".to_string(),
        exists: true,
        http_status: 200,
        final_url: "https://site.test/".to_string(),
    }];

    let selected = OutputKind::ALL.to_vec();
    let totals = reports::write_all(&ReportInputs {
        out_dir: dir.path(),
        selected: &selected,
        urls: &urls,
        pages: &pages,
        edge_count: 3,
        existence: &existence,
        input: &input,
        keep_page_param: false,
        duration_secs: 7,
    })
    .await
    .unwrap();

    assert_eq!(totals.urls, 2);
    assert_eq!(totals.comparison_rows, 2);

    for artifact in [
        "urls-final.txt",
        "site_catalog.csv",
        "duplicate-titles.csv",
        "tree.txt",
        "tree-examples.md",
        "url-existence.csv",
        "url-existence.json",
        "working-urls.txt",
        "not-working-urls.txt",
        "comparison.csv",
        "extras.csv",
        "summary.txt",
    ] {
        assert!(dir.path().join(artifact).exists(), "missing {}", artifact);
    }

    let comparison = std::fs::read_to_string(dir.path().join("comparison.csv")).unwrap();
    assert!(comparison.contains("correct"));
    assert!(comparison.contains("desc-mismatch-only"));
}

#[tokio::test]
async fn cursor_survives_partial_consumption() {
    let dir = TempDir::new().unwrap();
    let (frontier, ledger) = open_pair(&dir, 1);
    let urls: Vec<String> = (0..6)
        .map(|i| format!("https://site.test/{}", i))
        .collect();
    frontier.seed(&urls).await.unwrap();

    // Claim three, then reopen the frontier (as a restarted process would).
    for _ in 0..3 {
        let (_, ticket) = frontier
            .claim_next(0, &ledger, &accept_all)
            .await
            .unwrap()
            .unwrap();
        ticket.complete().await.unwrap();
    }

    let reopened = Frontier::open(&dir.path().join("frontier"), 1, &Tuning::default()).unwrap();
    let mut rest = 0;
    while let Some((_, ticket)) = reopened
        .claim_next(0, &ledger, &accept_all)
        .await
        .unwrap()
    {
        ticket.complete().await.unwrap();
        rest += 1;
    }
    assert_eq!(rest, 3);
    assert_eq!(ledger.done_count(), 6);
}
