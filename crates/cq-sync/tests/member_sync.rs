mod common;

use common::{harness, ids, member_detail, member_page, members_without_timestamps, BASE};
use cq_storage::testing::Scripted;
use cq_sync::{JobKind, SyncError, WalkStatus};

fn list_url(query: &str) -> String {
    format!("{BASE}/member?{query}")
}

#[tokio::test]
async fn walks_three_pages_and_stops_on_short_page() {
    let h = harness(&[("CQ_MEMBER_PAGE_LIMIT", "100")]);
    let first = list_url("limit=100&currentMember=true");
    let second = list_url("offset=100&limit=100&currentMember=true");
    let third = list_url("offset=200&limit=100&currentMember=true");
    h.transport
        .route_json(&first, member_page(&ids('A', 0..100), Some(&second)));
    h.transport
        .route_json(&second, member_page(&ids('B', 0..100), Some(&third)));
    h.transport.route_json(&third, member_page(&ids('C', 0..50), None));

    let summary = h.pipeline.run_members().await.unwrap();

    assert_eq!(h.transport.call_count(&first), 1);
    assert_eq!(h.transport.call_count(&second), 1);
    assert_eq!(h.transport.call_count(&third), 1);
    assert_eq!(summary.pages_fetched, 3);
    assert_eq!(summary.items_seen, 250);
    assert_eq!(summary.walk_status, Some(WalkStatus::Exhausted));
    assert_eq!(h.store.members().len(), 250);
    assert_eq!(
        h.store.upsert_calls(),
        vec![("members", 100), ("members", 100), ("members", 50)]
    );
}

#[tokio::test]
async fn every_request_carries_the_api_key() {
    let h = harness(&[]);
    h.transport.route_json(
        &list_url("limit=250&currentMember=true"),
        member_page(&ids('A', 0..2), None),
    );
    h.pipeline.run_members().await.unwrap();

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 3);
    for url in requests {
        assert!(
            url.query_pairs().any(|(k, v)| k == "api_key" && v == "test-key"),
            "{url} has no key"
        );
    }
}

#[tokio::test]
async fn members_without_detail_are_still_persisted() {
    let h = harness(&[]);
    let listed = ids('A', 0..3);
    h.transport.route_json(
        &list_url("limit=250&currentMember=true"),
        member_page(&listed, None),
    );
    h.transport
        .route_json(&format!("{BASE}/member/{}", listed[0]), member_detail(&listed[0]));
    h.transport
        .route(&format!("{BASE}/member/{}", listed[1]), vec![Scripted::Status(520)]);

    let summary = h.pipeline.run_members().await.unwrap();

    assert_eq!(summary.records_upserted, 3);
    assert_eq!(summary.details_missing, 2);
    let enriched = h.store.member(&listed[0]).unwrap();
    assert!(enriched.enriched);
    assert_eq!(enriched.birth_year, Some(1970));
    let bare = h.store.member(&listed[1]).unwrap();
    assert!(!bare.enriched);
    assert_eq!(bare.party, "Democratic");
    assert!(bare.first_name.is_none());
    assert_eq!(bare.image_url(), Some("https://img.test/A000001.jpg"));
    assert_eq!(
        h.transport.call_count(&format!("{BASE}/member/{}", listed[1])),
        4
    );
}

#[tokio::test]
async fn rerun_against_unchanged_upstream_is_idempotent() {
    let h = harness(&[("CQ_MEMBER_PAGE_LIMIT", "3")]);
    let first = list_url("limit=3&currentMember=true");
    let second = list_url("offset=3&limit=3&currentMember=true");
    let page_one = ids('A', 0..3);
    let page_two = ids('B', 0..2);
    h.transport.route_json(&first, member_page(&page_one, Some(&second)));
    h.transport.route_json(&second, member_page(&page_two, None));
    for id in page_one.iter().chain(&page_two) {
        h.transport
            .route_json(&format!("{BASE}/member/{id}"), member_detail(id));
    }

    h.pipeline.run_members().await.unwrap();
    let after_first = members_without_timestamps(&h.store);
    h.pipeline.run_members().await.unwrap();
    let after_second = members_without_timestamps(&h.store);

    assert_eq!(after_first.len(), 5);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn later_run_without_detail_keeps_richer_fields() {
    let h = harness(&[]);
    let listed = ids('A', 0..1);
    let detail_url = format!("{BASE}/member/{}", listed[0]);
    h.transport.route_json(
        &list_url("limit=250&currentMember=true"),
        member_page(&listed, None),
    );
    h.transport.route_json(&detail_url, member_detail(&listed[0]));
    h.pipeline.run_members().await.unwrap();
    let enriched_terms = h.store.member(&listed[0]).unwrap().terms;
    assert_eq!(
        enriched_terms.as_ref().and_then(|t| t.first()).and_then(|t| t.congress),
        Some(118)
    );

    h.transport.route(&detail_url, vec![Scripted::NetworkError]);
    h.pipeline.run_members().await.unwrap();

    let stored = h.store.member(&listed[0]).unwrap();
    assert_eq!(stored.terms, enriched_terms);
    assert_eq!(stored.birth_year, Some(1970));
    assert!(stored.sponsored_legislation.is_some());
    assert!(stored.enriched);
}

#[tokio::test]
async fn storage_failure_aborts_remaining_pages() {
    let h = harness(&[("CQ_MEMBER_PAGE_LIMIT", "2")]);
    let first = list_url("limit=2&currentMember=true");
    let second = list_url("offset=2&limit=2&currentMember=true");
    h.transport.route_json(&first, member_page(&ids('A', 0..2), Some(&second)));
    h.transport.route_json(&second, member_page(&ids('B', 0..1), None));
    h.store.fail_on("members");

    let err = h.pipeline.run_members().await.unwrap_err();

    assert!(matches!(err, SyncError::Storage(_)));
    assert_eq!(h.transport.call_count(&second), 0);
    assert!(h.store.members().is_empty());
}

#[tokio::test]
async fn failed_first_page_is_not_fatal() {
    let h = harness(&[]);
    h.transport.route(
        &list_url("limit=250&currentMember=true"),
        vec![Scripted::Status(503)],
    );
    let summary = h.pipeline.run_members().await.unwrap();
    assert_eq!(summary.walk_status, Some(WalkStatus::FetchFailed));
    assert_eq!(summary.incomplete_walks, 1);
    assert!(h.store.upsert_calls().is_empty());
}

#[tokio::test]
async fn all_members_listing_drops_current_filter() {
    let h = harness(&[("CQ_CURRENT_MEMBERS_ONLY", "false")]);
    let url = list_url("limit=250");
    h.transport.route_json(&url, member_page(&ids('A', 0..1), None));
    h.pipeline.run_members().await.unwrap();
    assert_eq!(h.transport.call_count(&url), 1);
}

#[tokio::test]
async fn report_is_written_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let reports = dir.path().to_string_lossy().to_string();
    let h = harness(&[("CQ_REPORTS_DIR", reports.as_str())]);
    h.transport.route_json(
        &list_url("limit=250&currentMember=true"),
        member_page(&ids('A', 0..1), None),
    );

    let summary = h.pipeline.run_job(JobKind::Members).await.unwrap();

    let path = dir
        .path()
        .join(summary.run_id.to_string())
        .join("summary.json");
    let report: serde_json::Value =
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(report["job"], "members");
    assert_eq!(report["records_upserted"], 1);
    assert!(report["finished_at"].is_string());
}
