mod common;

use std::sync::Arc;

use cq_storage::memory::MemoryRecordStore;
use cq_sync::SyncPipeline;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn member_job_against_http_upstream() {
    let server = MockServer::start().await;
    let base = format!("{}/v3", server.uri());

    Mock::given(method("GET"))
        .and(path("/v3/member"))
        .and(query_param("api_key", "test-key"))
        .and(query_param("currentMember", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "members": [common::member_summary("H000001"), common::member_summary("H000002")],
            "pagination": {"count": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v3/member/H000001"))
        .respond_with(ResponseTemplate::new(520))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/member/H000001"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::member_detail("H000001")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/member/H000002"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let config = common::config(&[("CONGRESS_BASE_URL", base.as_str())]);
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = SyncPipeline::new(config, store.clone()).unwrap();

    let summary = pipeline.run_members().await.unwrap();

    assert_eq!(summary.records_upserted, 2);
    assert_eq!(summary.details_missing, 1);
    assert!(store.member("H000001").unwrap().enriched);
    assert!(!store.member("H000002").unwrap().enriched);
}
