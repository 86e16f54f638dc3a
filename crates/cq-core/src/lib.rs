//! Core domain model for the member and legislation datasets.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cq-core";

/// Party written when neither the detail nor the summary names one.
pub const PARTY_UNKNOWN: &str = "Unknown";

/// Policy area written when a bill has none.
pub const POLICY_AREA_UNKNOWN: &str = "N/A";

/// Rows that are written with insert-or-overwrite semantics keyed by a natural key.
pub trait Upsertable: Sized {
    const TABLE: &'static str;
    const CONFLICT_KEYS: &'static [&'static str];
    type Key: Ord + Clone + fmt::Debug;

    fn conflict_key(&self) -> Self::Key;

    /// Combine this row with an earlier one for the same key. Plain overwrite
    /// unless the row type keeps some fields on missing values.
    fn merge_onto(self, _stored: &Self) -> Self {
        self
    }
}

/// Collapse rows sharing a conflict key. Later occurrences are merged onto
/// earlier ones and the result keeps the position of the first.
pub fn dedupe_by_conflict_key<T: Upsertable + Clone>(rows: &[T]) -> Vec<T> {
    let mut positions: BTreeMap<T::Key, usize> = BTreeMap::new();
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        match positions.get(&row.conflict_key()) {
            Some(&idx) => {
                let merged = row.clone().merge_onto(&out[idx]);
                out[idx] = merged;
            }
            None => {
                positions.insert(row.conflict_key(), out.len());
                out.push(row.clone());
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Depiction {
    pub image_url: Option<String>,
    pub attribution: Option<String>,
}

/// `{count, url}` pointer to one of a member's legislation lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LegislationRef {
    pub count: Option<i32>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartyAffiliation {
    pub party_name: Option<String>,
    pub party_abbreviation: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Address {
    pub office_address: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub zip_code: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Term {
    pub chamber: Option<String>,
    pub congress: Option<i32>,
    pub member_type: Option<String>,
    pub state_code: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

/// One legislature member as persisted in `members`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub bioguide_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub direct_order_name: Option<String>,
    pub inverted_order_name: Option<String>,
    pub party: String,
    pub party_history: Option<Vec<PartyAffiliation>>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub address: Option<Address>,
    pub depiction: Option<Depiction>,
    pub sponsored_legislation: Option<LegislationRef>,
    pub cosponsored_legislation: Option<LegislationRef>,
    pub terms: Option<Vec<Term>>,
    pub birth_year: Option<i32>,
    pub death_year: Option<i32>,
    pub current_member: bool,
    /// Whether the detail fetch succeeded for this record.
    pub enriched: bool,
    pub updated_at: DateTime<Utc>,
}

impl MemberRecord {
    pub fn image_url(&self) -> Option<&str> {
        self.depiction.as_ref().and_then(|d| d.image_url.as_deref())
    }
}

impl Upsertable for MemberRecord {
    const TABLE: &'static str = "members";
    const CONFLICT_KEYS: &'static [&'static str] = &["bioguide_id"];
    type Key = String;

    fn conflict_key(&self) -> Self::Key {
        self.bioguide_id.clone()
    }

    /// Combine an incoming record with the stored row for the same member.
    ///
    /// Enriched records overwrite everything except an image the incoming
    /// record lacks. Unenriched records only carry summary-level fields, so
    /// detail-only fields fall back to what was stored. Listing terms are
    /// thinner than detail terms and never replace terms from an enriched row.
    fn merge_onto(self, stored: &MemberRecord) -> MemberRecord {
        let depiction = match self.depiction {
            Some(d) if d.image_url.is_some() => Some(d),
            _ => stored.depiction.clone(),
        };

        if self.enriched {
            return MemberRecord { depiction, ..self };
        }

        let terms = if stored.enriched {
            stored.terms.clone()
        } else {
            self.terms.or_else(|| stored.terms.clone())
        };

        MemberRecord {
            first_name: stored.first_name.clone(),
            last_name: stored.last_name.clone(),
            direct_order_name: stored.direct_order_name.clone(),
            party_history: stored.party_history.clone(),
            address: stored.address.clone(),
            sponsored_legislation: stored.sponsored_legislation.clone(),
            cosponsored_legislation: stored.cosponsored_legislation.clone(),
            birth_year: stored.birth_year,
            death_year: stored.death_year,
            current_member: stored.current_member,
            enriched: stored.enriched,
            depiction,
            terms,
            ..self
        }
    }
}

/// Projection of a stored member used to drive the legislation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSeed {
    pub bioguide_id: String,
    pub sponsored_url: Option<String>,
    pub cosponsored_url: Option<String>,
}

impl MemberSeed {
    pub fn url_for(&self, role: SponsorshipRole) -> Option<&str> {
        let url = match role {
            SponsorshipRole::Sponsor => self.sponsored_url.as_deref(),
            SponsorshipRole::Cosponsor => self.cosponsored_url.as_deref(),
        };
        url.filter(|u| !u.trim().is_empty())
    }

    pub fn has_legislation_urls(&self) -> bool {
        SponsorshipRole::ALL.iter().any(|role| self.url_for(*role).is_some())
    }
}

impl From<&MemberRecord> for MemberSeed {
    fn from(record: &MemberRecord) -> Self {
        Self {
            bioguide_id: record.bioguide_id.clone(),
            sponsored_url: record
                .sponsored_legislation
                .as_ref()
                .and_then(|r| r.url.clone()),
            cosponsored_url: record
                .cosponsored_legislation
                .as_ref()
                .and_then(|r| r.url.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LegislationKind {
    Bill,
    Amendment,
}

impl LegislationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bill => "bill",
            Self::Amendment => "amendment",
        }
    }
}

impl fmt::Display for LegislationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SponsorshipRole {
    Sponsor,
    Cosponsor,
}

impl SponsorshipRole {
    pub const ALL: [SponsorshipRole; 2] = [Self::Sponsor, Self::Cosponsor];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sponsor => "Sponsor",
            Self::Cosponsor => "Cosponsor",
        }
    }
}

impl fmt::Display for SponsorshipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bill or amendment as persisted in `legislations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegislationRecord {
    pub congress: i32,
    pub number: String,
    /// Upstream type code (`HR`, `S`, `SAMDT`, ...); `AMDT` for untyped amendments.
    pub legislation_type: String,
    pub kind: LegislationKind,
    pub title: Option<String>,
    pub policy_area: String,
    pub url: Option<String>,
    pub introduced_date: Option<NaiveDate>,
    pub latest_action_date: Option<NaiveDate>,
    pub latest_action_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Upsertable for LegislationRecord {
    const TABLE: &'static str = "legislations";
    const CONFLICT_KEYS: &'static [&'static str] = &["congress", "legislation_type", "number"];
    type Key = (i32, String, String);

    fn conflict_key(&self) -> Self::Key {
        (
            self.congress,
            self.legislation_type.clone(),
            self.number.clone(),
        )
    }

    /// A bill listed without a policy area keeps the one already known.
    fn merge_onto(self, stored: &LegislationRecord) -> LegislationRecord {
        if self.policy_area == POLICY_AREA_UNKNOWN {
            LegislationRecord {
                policy_area: stored.policy_area.clone(),
                ..self
            }
        } else {
            self
        }
    }
}

/// Member-to-legislation join row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sponsorship {
    pub bioguide_id: String,
    pub congress: i32,
    pub legislation_type: String,
    pub number: String,
    pub role: SponsorshipRole,
    pub updated_at: DateTime<Utc>,
}

impl Sponsorship {
    pub fn for_record(
        bioguide_id: &str,
        record: &LegislationRecord,
        role: SponsorshipRole,
    ) -> Self {
        Self {
            bioguide_id: bioguide_id.to_string(),
            congress: record.congress,
            legislation_type: record.legislation_type.clone(),
            number: record.number.clone(),
            role,
            updated_at: record.updated_at,
        }
    }
}

impl Upsertable for Sponsorship {
    const TABLE: &'static str = "legislation_sponsors";
    const CONFLICT_KEYS: &'static [&'static str] = &[
        "bioguide_id",
        "congress",
        "legislation_type",
        "number",
        "role",
    ];
    type Key = (String, i32, String, String, SponsorshipRole);

    fn conflict_key(&self) -> Self::Key {
        (
            self.bioguide_id.clone(),
            self.congress,
            self.legislation_type.clone(),
            self.number.clone(),
            self.role,
        )
    }
}
