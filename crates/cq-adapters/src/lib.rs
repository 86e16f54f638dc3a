//! Congress API adapter: endpoint URLs, page envelopes and record normalization.

use chrono::{DateTime, NaiveDate, Utc};
use cq_core::{
    Address, Depiction, LegislationKind, LegislationRecord, LegislationRef, MemberRecord,
    PartyAffiliation, SponsorshipRole, Term, PARTY_UNKNOWN, POLICY_AREA_UNKNOWN,
};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "cq-adapters";

pub const DEFAULT_BASE_URL: &str = "https://api.congress.gov/v3";

/// Array key of the member listing envelope.
pub const MEMBERS_KEY: &str = "members";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{entity} record has no {field}")]
    MissingIdentity {
        entity: &'static str,
        field: &'static str,
    },
}

/// Array key of the sponsored / cosponsored listing envelope.
pub fn items_key(role: SponsorshipRole) -> &'static str {
    match role {
        SponsorshipRole::Sponsor => "sponsoredLegislation",
        SponsorshipRole::Cosponsor => "cosponsoredLegislation",
    }
}

#[derive(Debug, Clone)]
pub struct CongressEndpoints {
    base_url: String,
}

impl Default for CongressEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl CongressEndpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn member_list(&self, limit: usize, current_only: bool) -> String {
        let mut url = format!("{}/member?limit={limit}", self.base_url);
        if current_only {
            url.push_str("&currentMember=true");
        }
        url
    }

    pub fn member_detail(&self, bioguide_id: &str) -> String {
        format!("{}/member/{bioguide_id}", self.base_url)
    }

    /// `{base}/member/{id}/sponsored-legislation` and its cosponsored twin.
    pub fn member_legislation(&self, bioguide_id: &str, role: SponsorshipRole) -> String {
        let segment = match role {
            SponsorshipRole::Sponsor => "sponsored-legislation",
            SponsorshipRole::Cosponsor => "cosponsored-legislation",
        };
        format!("{}/member/{bioguide_id}/{segment}", self.base_url)
    }
}

/// Ensure a listing URL carries a page size.
pub fn with_page_limit(url: &str, limit: usize) -> String {
    let has_limit = url
        .split_once('?')
        .map(|(_, q)| q.split('&').any(|p| p.starts_with("limit=")))
        .unwrap_or(false);
    if has_limit {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}limit={limit}")
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<JsonValue>,
    pub next: Option<String>,
    pub total: Option<u64>,
}

impl Page {
    /// Read `{ <items_key>: [...], pagination: { next, count } }`; a missing
    /// array reads as an empty page.
    pub fn parse(value: &JsonValue, items_key: &str) -> Self {
        let items = value
            .get(items_key)
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        let next = json_str(value, &["pagination", "next"])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);
        let total = json_at(value, &["pagination", "count"]).and_then(JsonValue::as_u64);
        Self { items, next, total }
    }
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// String or number rendered as text; blank strings read as absent.
fn json_text(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer given either as a JSON number or a numeric string.
fn json_i32(value: &JsonValue, path: &[&str]) -> Option<i32> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_bool(value: &JsonValue, path: &[&str]) -> Option<bool> {
    json_at(value, path)?.as_bool()
}

fn json_date(value: &JsonValue, path: &[&str]) -> Option<NaiveDate> {
    let text = json_str(value, path)?;
    let day = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Detail first, then summary.
fn prefer<'a, T>(
    summary: &'a JsonValue,
    detail: Option<&'a JsonValue>,
    read: impl Fn(&'a JsonValue) -> Option<T>,
) -> Option<T> {
    detail.and_then(&read).or_else(|| read(summary))
}

/// Unwrap the `{ "member": {...} }` detail envelope.
pub fn member_detail_payload(response: &JsonValue) -> Option<&JsonValue> {
    json_at(response, &["member"]).filter(|v| v.is_object())
}

/// Unwrap a `{ "bill": {...} }` or `{ "amendment": {...} }` detail envelope.
pub fn legislation_detail_payload(response: &JsonValue) -> Option<&JsonValue> {
    json_at(response, &["bill"])
        .or_else(|| json_at(response, &["amendment"]))
        .filter(|v| v.is_object())
}

pub fn member_bioguide_id(summary: &JsonValue) -> Option<&str> {
    json_str(summary, &["bioguideId"])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn party_affiliations(detail: &JsonValue) -> Option<Vec<PartyAffiliation>> {
    let arr = json_at(detail, &["partyHistory"])?.as_array()?;
    Some(
        arr.iter()
            .map(|p| PartyAffiliation {
                party_name: json_text(p, &["partyName"]),
                party_abbreviation: json_text(p, &["partyAbbreviation"]),
                start_year: json_i32(p, &["startYear"]),
                end_year: json_i32(p, &["endYear"]),
            })
            .collect(),
    )
}

/// Latest open affiliation, else the last one listed.
fn current_party(history: &[PartyAffiliation]) -> Option<String> {
    history
        .iter()
        .rev()
        .find(|p| p.end_year.is_none() && p.party_name.is_some())
        .or_else(|| history.iter().rev().find(|p| p.party_name.is_some()))
        .and_then(|p| p.party_name.clone())
}

fn address(detail: &JsonValue) -> Option<Address> {
    let info = json_at(detail, &["addressInformation"])?;
    Some(Address {
        office_address: json_text(info, &["officeAddress"]),
        city: json_text(info, &["city"]),
        district: json_text(info, &["district"]),
        zip_code: json_text(info, &["zipCode"]),
        phone_number: json_text(info, &["phoneNumber"]),
    })
}

fn depiction(value: &JsonValue) -> Option<Depiction> {
    let d = json_at(value, &["depiction"])?;
    let depiction = Depiction {
        image_url: json_text(d, &["imageUrl"]),
        attribution: json_text(d, &["attribution"]),
    };
    (depiction.image_url.is_some() || depiction.attribution.is_some()).then_some(depiction)
}

fn legislation_ref(detail: &JsonValue, key: &str) -> Option<LegislationRef> {
    let r = json_at(detail, &[key])?;
    Some(LegislationRef {
        count: json_i32(r, &["count"]),
        url: json_text(r, &["url"]),
    })
}

/// Detail payloads list terms as an array; listings wrap them in `{ item: [...] }`.
fn terms(value: &JsonValue) -> Option<Vec<Term>> {
    let raw = json_at(value, &["terms"])?;
    let arr = raw
        .as_array()
        .or_else(|| json_at(raw, &["item"]).and_then(JsonValue::as_array))?;
    Some(
        arr.iter()
            .map(|t| Term {
                chamber: json_text(t, &["chamber"]),
                congress: json_i32(t, &["congress"]),
                member_type: json_text(t, &["memberType"]),
                state_code: json_text(t, &["stateCode"]),
                start_year: json_i32(t, &["startYear"]),
                end_year: json_i32(t, &["endYear"]),
            })
            .collect(),
    )
}

/// Build the persisted member from a listing summary and its (possibly
/// missing) detail payload. Only a missing `bioguideId` is an error.
pub fn normalize_member(
    summary: &JsonValue,
    detail: Option<&JsonValue>,
    synced_at: DateTime<Utc>,
) -> Result<MemberRecord, AdapterError> {
    let bioguide_id = member_bioguide_id(summary)
        .or_else(|| detail.and_then(member_bioguide_id))
        .ok_or(AdapterError::MissingIdentity {
            entity: "member",
            field: "bioguideId",
        })?
        .to_string();

    let party_history = detail.and_then(party_affiliations);
    let party = prefer(summary, detail, |v| json_text(v, &["partyName"]))
        .or_else(|| party_history.as_deref().and_then(current_party))
        .unwrap_or_else(|| PARTY_UNKNOWN.to_string());

    Ok(MemberRecord {
        bioguide_id,
        first_name: detail.and_then(|d| json_text(d, &["firstName"])),
        last_name: detail.and_then(|d| json_text(d, &["lastName"])),
        direct_order_name: detail.and_then(|d| json_text(d, &["directOrderName"])),
        inverted_order_name: prefer(summary, detail, |v| json_text(v, &["invertedOrderName"]))
            .or_else(|| json_text(summary, &["name"])),
        party,
        party_history,
        state: prefer(summary, detail, |v| json_text(v, &["state"])),
        district: prefer(summary, detail, |v| json_text(v, &["district"])),
        address: detail.and_then(address),
        depiction: prefer(summary, detail, depiction),
        sponsored_legislation: detail.and_then(|d| legislation_ref(d, "sponsoredLegislation")),
        cosponsored_legislation: detail.and_then(|d| legislation_ref(d, "cosponsoredLegislation")),
        terms: prefer(summary, detail, terms),
        birth_year: detail.and_then(|d| json_i32(d, &["birthYear"])),
        death_year: detail.and_then(|d| json_i32(d, &["deathYear"])),
        current_member: prefer(summary, detail, |v| json_bool(v, &["currentMember"])).unwrap_or(false),
        enriched: detail.is_some(),
        updated_at: synced_at,
    })
}

pub fn legislation_detail_url(summary: &JsonValue) -> Option<&str> {
    json_str(summary, &["url"])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn legislation_kind(summary: &JsonValue, detail: Option<&JsonValue>) -> LegislationKind {
    let is_amendment = prefer(summary, detail, |v| json_text(v, &["amendmentNumber"])).is_some()
        || legislation_detail_url(summary).is_some_and(|u| u.contains("/amendment/"));
    if is_amendment {
        LegislationKind::Amendment
    } else {
        LegislationKind::Bill
    }
}

/// `HR` from `.../bill/118/hr/1234?format=json`.
fn type_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next()?;
    let mut segments = path.split('/').skip_while(|s| *s != "bill" && *s != "amendment");
    segments.next()?;
    segments.next()?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_uppercase)
}

/// Build the persisted bill / amendment from a listing item and optional
/// detail payload. Items without a congress or number cannot be keyed.
pub fn normalize_legislation(
    summary: &JsonValue,
    detail: Option<&JsonValue>,
    synced_at: DateTime<Utc>,
) -> Result<LegislationRecord, AdapterError> {
    let congress = prefer(summary, detail, |v| json_i32(v, &["congress"])).ok_or(
        AdapterError::MissingIdentity {
            entity: "legislation",
            field: "congress",
        },
    )?;
    let number = prefer(summary, detail, |v| {
        json_text(v, &["number"]).or_else(|| json_text(v, &["amendmentNumber"]))
    })
    .ok_or(AdapterError::MissingIdentity {
        entity: "legislation",
        field: "number",
    })?;

    let kind = legislation_kind(summary, detail);
    let url = prefer(summary, detail, |v| json_text(v, &["url"]));
    let legislation_type = prefer(summary, detail, |v| json_text(v, &["type"]))
        .map(|t| t.to_ascii_uppercase())
        .or_else(|| url.as_deref().and_then(type_from_url))
        .unwrap_or_else(|| match kind {
            LegislationKind::Amendment => "AMDT".to_string(),
            LegislationKind::Bill => "UNKNOWN".to_string(),
        });

    Ok(LegislationRecord {
        congress,
        number,
        legislation_type,
        kind,
        title: prefer(summary, detail, |v| {
            json_text(v, &["title"])
                .or_else(|| json_text(v, &["description"]))
                .or_else(|| json_text(v, &["purpose"]))
        }),
        policy_area: prefer(summary, detail, |v| json_text(v, &["policyArea", "name"]))
            .unwrap_or_else(|| POLICY_AREA_UNKNOWN.to_string()),
        url,
        introduced_date: prefer(summary, detail, |v| json_date(v, &["introducedDate"])),
        latest_action_date: prefer(summary, detail, |v| {
            json_date(v, &["latestAction", "actionDate"])
        }),
        latest_action_text: prefer(summary, detail, |v| json_text(v, &["latestAction", "text"])),
        updated_at: synced_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn member_without_detail_defaults_party_and_nulls_detail_fields() {
        let summary = json!({"bioguideId": "Z000017", "state": "New York"});
        let record = normalize_member(&summary, None, ts()).unwrap();
        assert_eq!(record.party, "Unknown");
        assert_eq!(record.state.as_deref(), Some("New York"));
        assert!(record.first_name.is_none());
        assert!(record.party_history.is_none());
        assert!(record.address.is_none());
        assert!(record.sponsored_legislation.is_none());
        assert!(record.birth_year.is_none());
        assert!(!record.current_member);
        assert!(!record.enriched);
    }

    #[test]
    fn member_without_bioguide_id_is_rejected() {
        let err = normalize_member(&json!({"bioguideId": "  "}), None, ts()).unwrap_err();
        assert_eq!(
            err,
            AdapterError::MissingIdentity {
                entity: "member",
                field: "bioguideId"
            }
        );
    }

    #[test]
    fn detail_fields_win_over_summary() {
        let summary = json!({
            "bioguideId": "A000055",
            "name": "Aderholt, Robert B.",
            "partyName": "Republican",
            "state": "Alabama",
            "district": 4,
            "terms": {"item": [{"chamber": "House of Representatives", "startYear": 1997}]}
        });
        let detail = json!({
            "bioguideId": "A000055",
            "firstName": "Robert",
            "birthYear": "1965",
            "currentMember": true,
            "state": "Alabama",
            "partyHistory": [{"partyName": "Republican", "partyAbbreviation": "R", "startYear": 1997}],
            "terms": [
                {"chamber": "House of Representatives", "congress": 105, "startYear": 1997, "endYear": 1999},
                {"chamber": "House of Representatives", "congress": 106, "startYear": 1999, "endYear": 2001}
            ],
            "sponsoredLegislation": {"count": 12, "url": "https://api.congress.gov/v3/member/A000055/sponsored-legislation"},
            "addressInformation": {"city": "Washington", "zipCode": 20515, "phoneNumber": "(202) 225-4876"}
        });
        let record = normalize_member(&summary, Some(&detail), ts()).unwrap();
        assert_eq!(record.first_name.as_deref(), Some("Robert"));
        assert_eq!(record.birth_year, Some(1965));
        assert!(record.current_member);
        assert!(record.enriched);
        assert_eq!(record.district.as_deref(), Some("4"));
        assert_eq!(record.inverted_order_name.as_deref(), Some("Aderholt, Robert B."));
        assert_eq!(record.terms.as_ref().map(Vec::len), Some(2));
        assert_eq!(
            record.address.as_ref().and_then(|a| a.zip_code.as_deref()),
            Some("20515")
        );
        assert_eq!(
            record.sponsored_legislation.as_ref().and_then(|r| r.count),
            Some(12)
        );
    }

    #[test]
    fn party_falls_back_to_open_affiliation_in_history() {
        let detail = json!({
            "partyHistory": [
                {"partyName": "Democratic", "startYear": 1990, "endYear": 2001},
                {"partyName": "Independent", "startYear": 2001}
            ]
        });
        let record = normalize_member(&json!({"bioguideId": "S000033"}), Some(&detail), ts()).unwrap();
        assert_eq!(record.party, "Independent");
    }

    #[test]
    fn listing_terms_unwrap_item_envelope() {
        let summary = json!({
            "bioguideId": "B000001",
            "terms": {"item": [{"chamber": "Senate", "startYear": 2021}]}
        });
        let record = normalize_member(&summary, None, ts()).unwrap();
        let terms = record.terms.unwrap();
        assert_eq!(terms[0].chamber.as_deref(), Some("Senate"));
        assert_eq!(terms[0].start_year, Some(2021));
    }

    #[test]
    fn bill_policy_area_flattens_and_defaults() {
        let with_area = json!({
            "congress": 118, "number": "1234", "type": "hr",
            "title": "A bill", "policyArea": {"name": "Health"},
            "introducedDate": "2023-02-01",
            "latestAction": {"actionDate": "2023-03-04", "text": "Referred"},
            "url": "https://api.congress.gov/v3/bill/118/hr/1234?format=json"
        });
        let record = normalize_legislation(&with_area, None, ts()).unwrap();
        assert_eq!(record.policy_area, "Health");
        assert_eq!(record.legislation_type, "HR");
        assert_eq!(record.kind, LegislationKind::Bill);
        assert_eq!(record.introduced_date, NaiveDate::from_ymd_opt(2023, 2, 1));
        assert_eq!(record.latest_action_text.as_deref(), Some("Referred"));

        let bare = json!({"congress": 118, "number": "9", "type": "S", "policyArea": null});
        assert_eq!(normalize_legislation(&bare, None, ts()).unwrap().policy_area, "N/A");
    }

    #[test]
    fn amendment_is_discriminated_and_typed() {
        let item = json!({
            "congress": 117,
            "amendmentNumber": "2137",
            "introducedDate": "2022-06-07",
            "latestAction": {"actionDate": "2022-06-07", "text": ""},
            "url": "https://api.congress.gov/v3/amendment/117/samdt/2137?format=json"
        });
        let record = normalize_legislation(&item, None, ts()).unwrap();
        assert_eq!(record.kind, LegislationKind::Amendment);
        assert_eq!(record.number, "2137");
        assert_eq!(record.legislation_type, "SAMDT");
        assert!(record.latest_action_text.is_none());
    }

    #[test]
    fn legislation_detail_overrides_summary() {
        let summary = json!({"congress": 118, "number": "5", "type": "HR", "title": "short"});
        let response = json!({"bill": {"title": "Long official title", "policyArea": {"name": "Taxation"}}});
        let detail = legislation_detail_payload(&response);
        let record = normalize_legislation(&summary, detail, ts()).unwrap();
        assert_eq!(record.title.as_deref(), Some("Long official title"));
        assert_eq!(record.policy_area, "Taxation");
    }

    #[test]
    fn legislation_without_number_is_rejected() {
        assert!(normalize_legislation(&json!({"congress": 118}), None, ts()).is_err());
    }

    #[test]
    fn page_reads_items_and_next_link() {
        let value = json!({
            "members": [{"bioguideId": "A"}, {"bioguideId": "B"}],
            "pagination": {"count": 540, "next": "https://api.congress.gov/v3/member?offset=250&limit=250"}
        });
        let page = Page::parse(&value, MEMBERS_KEY);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, Some(540));
        assert!(page.next.unwrap().contains("offset=250"));

        let empty = Page::parse(&json!({"pagination": {"next": ""}}), MEMBERS_KEY);
        assert!(empty.items.is_empty());
        assert!(empty.next.is_none());
    }

    #[test]
    fn endpoints_build_listing_urls() {
        let endpoints = CongressEndpoints::new("https://api.example.test/v3/");
        assert_eq!(
            endpoints.member_list(250, true),
            "https://api.example.test/v3/member?limit=250&currentMember=true"
        );
        assert_eq!(
            endpoints.member_detail("A000055"),
            "https://api.example.test/v3/member/A000055"
        );
        assert_eq!(
            endpoints.member_legislation("A000055", SponsorshipRole::Cosponsor),
            "https://api.example.test/v3/member/A000055/cosponsored-legislation"
        );
    }

    #[test]
    fn page_limit_is_added_once() {
        assert_eq!(with_page_limit("https://x.test/a", 100), "https://x.test/a?limit=100");
        assert_eq!(
            with_page_limit("https://x.test/a?format=json", 100),
            "https://x.test/a?format=json&limit=100"
        );
        assert_eq!(with_page_limit("https://x.test/a?limit=20", 100), "https://x.test/a?limit=20");
    }
}
