//! Upsert sink for members, legislation and sponsorship rows.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cq_core::{
    dedupe_by_conflict_key, Depiction, LegislationRecord, LegislationRef, MemberRecord, MemberSeed,
    Sponsorship, Upsertable, POLICY_AREA_UNKNOWN,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Rows per INSERT statement; keeps bind parameters far below the Postgres limit.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Persistent storage for synced records.
///
/// Every upsert is a single batch keyed by the row type's conflict key;
/// rows repeated within a batch collapse to their last occurrence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert_members(&self, records: &[MemberRecord]) -> Result<usize, StoreError>;

    async fn upsert_legislation(&self, records: &[LegislationRecord]) -> Result<usize, StoreError>;

    async fn upsert_sponsorships(&self, rows: &[Sponsorship]) -> Result<usize, StoreError>;

    /// Members flagged current, with the list URLs the legislation job walks.
    async fn current_member_seeds(&self) -> Result<Vec<MemberSeed>, StoreError>;

    /// Random sample of current members for the quiz front end.
    async fn sample_current_members(&self, limit: usize) -> Result<Vec<MemberRecord>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

const MEMBER_COLUMNS: &[&str] = &[
    "bioguide_id",
    "first_name",
    "last_name",
    "direct_order_name",
    "inverted_order_name",
    "party",
    "party_history",
    "state",
    "district",
    "address",
    "image_url",
    "image_attribution",
    "sponsored_count",
    "sponsored_url",
    "cosponsored_count",
    "cosponsored_url",
    "terms",
    "birth_year",
    "death_year",
    "current_member",
    "enriched",
    "updated_at",
];

/// Columns only the member detail payload can populate.
const MEMBER_DETAIL_COLUMNS: &[&str] = &[
    "first_name",
    "last_name",
    "direct_order_name",
    "party_history",
    "address",
    "sponsored_count",
    "sponsored_url",
    "cosponsored_count",
    "cosponsored_url",
    "birth_year",
    "death_year",
    "current_member",
];

const LEGISLATION_COLUMNS: &[&str] = &[
    "congress",
    "legislation_type",
    "number",
    "kind",
    "title",
    "policy_area",
    "url",
    "introduced_date",
    "latest_action_date",
    "latest_action_text",
    "updated_at",
];

const SPONSORSHIP_COLUMNS: &[&str] = &[
    "bioguide_id",
    "congress",
    "legislation_type",
    "number",
    "role",
    "updated_at",
];

fn insert_prefix<T: Upsertable>(columns: &[&str]) -> String {
    format!("INSERT INTO {} ({}) ", T::TABLE, columns.join(", "))
}

pub(crate) fn member_conflict_clause() -> String {
    let table = MemberRecord::TABLE;
    let assignments = MEMBER_COLUMNS
        .iter()
        .filter(|c| !MemberRecord::CONFLICT_KEYS.contains(*c))
        .map(|&col| match col {
            "image_url" => format!("image_url = COALESCE(EXCLUDED.image_url, {table}.image_url)"),
            "image_attribution" => format!(
                "image_attribution = CASE WHEN EXCLUDED.image_url IS NULL \
                 THEN {table}.image_attribution ELSE EXCLUDED.image_attribution END"
            ),
            "enriched" => format!("enriched = EXCLUDED.enriched OR {table}.enriched"),
            "terms" => format!(
                "terms = CASE WHEN EXCLUDED.enriched THEN EXCLUDED.terms \
                 WHEN {table}.enriched THEN {table}.terms \
                 ELSE COALESCE(EXCLUDED.terms, {table}.terms) END"
            ),
            c if MEMBER_DETAIL_COLUMNS.contains(&c) => format!(
                "{c} = CASE WHEN EXCLUDED.enriched THEN EXCLUDED.{c} ELSE {table}.{c} END"
            ),
            c => format!("{c} = EXCLUDED.{c}"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        " ON CONFLICT ({}) DO UPDATE SET {assignments}",
        MemberRecord::CONFLICT_KEYS.join(", ")
    )
}

pub(crate) fn legislation_conflict_clause() -> String {
    let table = LegislationRecord::TABLE;
    let assignments = LEGISLATION_COLUMNS
        .iter()
        .filter(|c| !LegislationRecord::CONFLICT_KEYS.contains(*c))
        .map(|&col| match col {
            "policy_area" => format!(
                "policy_area = CASE WHEN EXCLUDED.policy_area = '{POLICY_AREA_UNKNOWN}' \
                 THEN {table}.policy_area ELSE EXCLUDED.policy_area END"
            ),
            c => format!("{c} = EXCLUDED.{c}"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        " ON CONFLICT ({}) DO UPDATE SET {assignments}",
        LegislationRecord::CONFLICT_KEYS.join(", ")
    )
}

pub(crate) fn sponsorship_conflict_clause() -> String {
    format!(
        " ON CONFLICT ({}) DO UPDATE SET updated_at = EXCLUDED.updated_at",
        Sponsorship::CONFLICT_KEYS.join(", ")
    )
}

impl PgRecordStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connect with the service credential, retrying until `connect_deadline`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(&config.url)?.password(&config.password);
        let max_interval = Duration::from_secs(10);
        let mut delay = Duration::from_millis(500);
        let start = Instant::now();

        let pool = loop {
            info!("connecting to storage");
            match PgPoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .acquire_timeout(Duration::from_secs(30))
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => break pool,
                Err(err) => {
                    if start.elapsed() >= config.connect_deadline {
                        warn!(error = %err, "storage not reachable; retries exhausted");
                        return Err(err.into());
                    }
                    warn!(error = %err, "storage not reachable yet; retrying");
                    sleep(delay).await;
                    delay = delay.saturating_mul(2).min(max_interval);
                }
            }
        };

        Ok(Self { pool })
    }

    pub async fn migrate(&self, migrations_dir: &Path) -> Result<(), StoreError> {
        let migrator = Migrator::new(migrations_dir).await?;
        migrator.run(&self.pool).await?;
        info!(dir = %migrations_dir.display(), "migrations applied");
        Ok(())
    }
}

fn member_from_row(row: &PgRow) -> Result<MemberRecord, sqlx::Error> {
    let image_url: Option<String> = row.try_get("image_url")?;
    let image_attribution: Option<String> = row.try_get("image_attribution")?;
    let depiction = (image_url.is_some() || image_attribution.is_some()).then(|| Depiction {
        image_url,
        attribution: image_attribution,
    });

    Ok(MemberRecord {
        bioguide_id: row.try_get("bioguide_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        direct_order_name: row.try_get("direct_order_name")?,
        inverted_order_name: row.try_get("inverted_order_name")?,
        party: row.try_get("party")?,
        party_history: row
            .try_get::<Option<Json<_>>, _>("party_history")?
            .map(|j| j.0),
        state: row.try_get("state")?,
        district: row.try_get("district")?,
        address: row.try_get::<Option<Json<_>>, _>("address")?.map(|j| j.0),
        depiction,
        sponsored_legislation: legislation_ref(
            row.try_get("sponsored_count")?,
            row.try_get("sponsored_url")?,
        ),
        cosponsored_legislation: legislation_ref(
            row.try_get("cosponsored_count")?,
            row.try_get("cosponsored_url")?,
        ),
        terms: row.try_get::<Option<Json<_>>, _>("terms")?.map(|j| j.0),
        birth_year: row.try_get("birth_year")?,
        death_year: row.try_get("death_year")?,
        current_member: row.try_get("current_member")?,
        enriched: row.try_get("enriched")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn legislation_ref(count: Option<i32>, url: Option<String>) -> Option<LegislationRef> {
    (count.is_some() || url.is_some()).then_some(LegislationRef { count, url })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn upsert_members(&self, records: &[MemberRecord]) -> Result<usize, StoreError> {
        let rows = dedupe_by_conflict_key(records);
        let conflict = member_conflict_clause();
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(insert_prefix::<MemberRecord>(MEMBER_COLUMNS));
            qb.push_values(chunk, |mut b, r| {
                let sponsored = r.sponsored_legislation.as_ref();
                let cosponsored = r.cosponsored_legislation.as_ref();
                b.push_bind(r.bioguide_id.as_str())
                    .push_bind(r.first_name.as_deref())
                    .push_bind(r.last_name.as_deref())
                    .push_bind(r.direct_order_name.as_deref())
                    .push_bind(r.inverted_order_name.as_deref())
                    .push_bind(r.party.as_str())
                    .push_bind(r.party_history.as_ref().map(Json))
                    .push_bind(r.state.as_deref())
                    .push_bind(r.district.as_deref())
                    .push_bind(r.address.as_ref().map(Json))
                    .push_bind(r.image_url())
                    .push_bind(r.depiction.as_ref().and_then(|d| d.attribution.as_deref()))
                    .push_bind(sponsored.and_then(|s| s.count))
                    .push_bind(sponsored.and_then(|s| s.url.as_deref()))
                    .push_bind(cosponsored.and_then(|s| s.count))
                    .push_bind(cosponsored.and_then(|s| s.url.as_deref()))
                    .push_bind(r.terms.as_ref().map(Json))
                    .push_bind(r.birth_year)
                    .push_bind(r.death_year)
                    .push_bind(r.current_member)
                    .push_bind(r.enriched)
                    .push_bind(r.updated_at);
            });
            qb.push(&conflict);
            qb.build().execute(&self.pool).await?;
        }
        debug!(table = MemberRecord::TABLE, rows = rows.len(), "upserted");
        Ok(rows.len())
    }

    async fn upsert_legislation(&self, records: &[LegislationRecord]) -> Result<usize, StoreError> {
        let rows = dedupe_by_conflict_key(records);
        let conflict = legislation_conflict_clause();
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(insert_prefix::<LegislationRecord>(LEGISLATION_COLUMNS));
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.congress)
                    .push_bind(r.legislation_type.as_str())
                    .push_bind(r.number.as_str())
                    .push_bind(r.kind.as_str())
                    .push_bind(r.title.as_deref())
                    .push_bind(r.policy_area.as_str())
                    .push_bind(r.url.as_deref())
                    .push_bind(r.introduced_date)
                    .push_bind(r.latest_action_date)
                    .push_bind(r.latest_action_text.as_deref())
                    .push_bind(r.updated_at);
            });
            qb.push(&conflict);
            qb.build().execute(&self.pool).await?;
        }
        debug!(table = LegislationRecord::TABLE, rows = rows.len(), "upserted");
        Ok(rows.len())
    }

    async fn upsert_sponsorships(&self, rows: &[Sponsorship]) -> Result<usize, StoreError> {
        let rows = dedupe_by_conflict_key(rows);
        let conflict = sponsorship_conflict_clause();
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(insert_prefix::<Sponsorship>(SPONSORSHIP_COLUMNS));
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.bioguide_id.as_str())
                    .push_bind(r.congress)
                    .push_bind(r.legislation_type.as_str())
                    .push_bind(r.number.as_str())
                    .push_bind(r.role.as_str())
                    .push_bind(r.updated_at);
            });
            qb.push(&conflict);
            qb.build().execute(&self.pool).await?;
        }
        debug!(table = Sponsorship::TABLE, rows = rows.len(), "upserted");
        Ok(rows.len())
    }

    async fn current_member_seeds(&self) -> Result<Vec<MemberSeed>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT bioguide_id, sponsored_url, cosponsored_url
            FROM members
            WHERE current_member = TRUE
            ORDER BY bioguide_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MemberSeed {
                    bioguide_id: row.try_get("bioguide_id")?,
                    sponsored_url: row.try_get("sponsored_url")?,
                    cosponsored_url: row.try_get("cosponsored_url")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn sample_current_members(&self, limit: usize) -> Result<Vec<MemberRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM members WHERE current_member = TRUE ORDER BY random() LIMIT $1",
            MEMBER_COLUMNS.join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(member_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}
