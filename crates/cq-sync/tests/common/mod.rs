#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use cq_core::{LegislationRef, MemberRecord};
use cq_storage::memory::MemoryRecordStore;
use cq_storage::testing::ScriptedTransport;
use cq_storage::HttpFetcher;
use cq_sync::{SyncConfig, SyncPipeline};
use serde_json::{json, Value};

pub const BASE: &str = "https://api.test/v3";

pub fn config(overrides: &[(&str, &str)]) -> SyncConfig {
    let mut env: HashMap<String, String> = [
        ("CONGRESS_API_KEY", "test-key"),
        ("CONGRESS_BASE_URL", BASE),
        ("DATABASE_URL", "postgres://cq@localhost/cq"),
        ("DATABASE_PASSWORD", "secret"),
        ("CQ_RETRY_DELAY_MS", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        env.insert(k.to_string(), v.to_string());
    }
    SyncConfig::from_lookup(|key: &str| env.get(key).cloned()).unwrap()
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<MemoryRecordStore>,
    pub pipeline: SyncPipeline,
}

pub fn harness(overrides: &[(&str, &str)]) -> Harness {
    let config = config(overrides);
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(MemoryRecordStore::new());
    let fetcher = HttpFetcher::with_transport(transport.clone(), config.http_client_config());
    let pipeline = SyncPipeline::with_fetcher(config, fetcher, store.clone());
    Harness {
        transport,
        store,
        pipeline,
    }
}

pub fn member_summary(id: &str) -> Value {
    json!({
        "bioguideId": id,
        "name": format!("{id}, Test"),
        "partyName": "Democratic",
        "state": "Ohio",
        "district": 3,
        "depiction": {"imageUrl": format!("https://img.test/{id}.jpg"), "attribution": "Congress"},
        "terms": {"item": [{"chamber": "House of Representatives", "startYear": 2019}]},
        "url": format!("{BASE}/member/{id}")
    })
}

pub fn member_detail(id: &str) -> Value {
    json!({
        "member": {
            "bioguideId": id,
            "firstName": "Test",
            "lastName": id,
            "directOrderName": format!("Test {id}"),
            "invertedOrderName": format!("{id}, Test"),
            "birthYear": "1970",
            "currentMember": true,
            "state": "Ohio",
            "partyHistory": [{"partyName": "Democratic", "partyAbbreviation": "D", "startYear": 2019}],
            "terms": [{"chamber": "House of Representatives", "congress": 118, "startYear": 2023}],
            "sponsoredLegislation": {"count": 2, "url": format!("{BASE}/member/{id}/sponsored-legislation")},
            "cosponsoredLegislation": {"count": 1, "url": format!("{BASE}/member/{id}/cosponsored-legislation")},
            "addressInformation": {"city": "Washington", "zipCode": 20515}
        }
    })
}

pub fn member_page(ids: &[String], next: Option<&str>) -> Value {
    let members: Vec<Value> = ids.iter().map(|id| member_summary(id)).collect();
    match next {
        Some(next) => json!({"members": members, "pagination": {"count": 999, "next": next}}),
        None => json!({"members": members, "pagination": {"count": ids.len()}}),
    }
}

pub fn ids(prefix: char, range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("{prefix}{i:06}")).collect()
}

pub fn bill(congress: i32, kind: &str, number: &str, policy: Option<&str>) -> Value {
    json!({
        "congress": congress,
        "number": number,
        "type": kind.to_uppercase(),
        "title": format!("{kind} {number}"),
        "policyArea": policy.map(|name| json!({"name": name})),
        "introducedDate": "2023-03-01",
        "latestAction": {"actionDate": "2023-04-02", "text": "Referred to committee."},
        "url": format!("{BASE}/bill/{congress}/{}/{number}?format=json", kind.to_lowercase())
    })
}

pub fn stored_member(id: &str, sponsored: Option<&str>, cosponsored: Option<&str>) -> MemberRecord {
    MemberRecord {
        bioguide_id: id.to_string(),
        first_name: Some("Test".into()),
        last_name: Some(id.to_string()),
        direct_order_name: None,
        inverted_order_name: None,
        party: "Independent".into(),
        party_history: None,
        state: Some("Ohio".into()),
        district: None,
        address: None,
        depiction: None,
        sponsored_legislation: sponsored.map(|url| LegislationRef {
            count: Some(1),
            url: Some(url.to_string()),
        }),
        cosponsored_legislation: cosponsored.map(|url| LegislationRef {
            count: Some(1),
            url: Some(url.to_string()),
        }),
        terms: None,
        birth_year: None,
        death_year: None,
        current_member: true,
        enriched: true,
        updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap(),
    }
}

/// Stored members with the sync timestamp cleared, for run-to-run comparison.
pub fn members_without_timestamps(store: &MemoryRecordStore) -> Vec<MemberRecord> {
    let epoch = Utc.timestamp_opt(0, 0).single().unwrap();
    store
        .members()
        .into_iter()
        .map(|mut m| {
            m.updated_at = epoch;
            m
        })
        .collect()
}
