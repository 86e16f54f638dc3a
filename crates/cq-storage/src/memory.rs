//! In-memory [`RecordStore`] applying the same conflict rules as Postgres.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use cq_core::{
    dedupe_by_conflict_key, LegislationRecord, MemberRecord, MemberSeed, Sponsorship, Upsertable,
};

use crate::{RecordStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    members: Mutex<BTreeMap<<MemberRecord as Upsertable>::Key, MemberRecord>>,
    legislation: Mutex<BTreeMap<<LegislationRecord as Upsertable>::Key, LegislationRecord>>,
    sponsorships: Mutex<BTreeMap<<Sponsorship as Upsertable>::Key, Sponsorship>>,
    upsert_calls: Mutex<Vec<(&'static str, usize)>>,
    failing_tables: Mutex<HashSet<&'static str>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upsert into `table` fail.
    pub fn fail_on(&self, table: &'static str) {
        self.failing_tables.lock().unwrap().insert(table);
    }

    pub fn seed_member(&self, record: MemberRecord) {
        self.members
            .lock()
            .unwrap()
            .insert(record.conflict_key(), record);
    }

    pub fn members(&self) -> Vec<MemberRecord> {
        self.members.lock().unwrap().values().cloned().collect()
    }

    pub fn member(&self, bioguide_id: &str) -> Option<MemberRecord> {
        self.members.lock().unwrap().get(bioguide_id).cloned()
    }

    pub fn legislation(&self) -> Vec<LegislationRecord> {
        self.legislation.lock().unwrap().values().cloned().collect()
    }

    pub fn sponsorships(&self) -> Vec<Sponsorship> {
        self.sponsorships.lock().unwrap().values().cloned().collect()
    }

    /// `(table, rows)` for every upsert call, in call order.
    pub fn upsert_calls(&self) -> Vec<(&'static str, usize)> {
        self.upsert_calls.lock().unwrap().clone()
    }

    fn check(&self, table: &'static str) -> Result<(), StoreError> {
        if self.failing_tables.lock().unwrap().contains(table) {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!(
                "injected failure writing {table}"
            ))));
        }
        Ok(())
    }

    fn record_call(&self, table: &'static str, rows: usize) {
        self.upsert_calls.lock().unwrap().push((table, rows));
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_members(&self, records: &[MemberRecord]) -> Result<usize, StoreError> {
        self.check(MemberRecord::TABLE)?;
        let rows = dedupe_by_conflict_key(records);
        let mut table = self.members.lock().unwrap();
        for row in &rows {
            let merged = match table.get(&row.conflict_key()) {
                Some(stored) => row.clone().merge_onto(stored),
                None => row.clone(),
            };
            table.insert(row.conflict_key(), merged);
        }
        drop(table);
        self.record_call(MemberRecord::TABLE, rows.len());
        Ok(rows.len())
    }

    async fn upsert_legislation(&self, records: &[LegislationRecord]) -> Result<usize, StoreError> {
        self.check(LegislationRecord::TABLE)?;
        let rows = dedupe_by_conflict_key(records);
        let mut table = self.legislation.lock().unwrap();
        for row in &rows {
            let merged = match table.get(&row.conflict_key()) {
                Some(stored) => row.clone().merge_onto(stored),
                None => row.clone(),
            };
            table.insert(row.conflict_key(), merged);
        }
        drop(table);
        self.record_call(LegislationRecord::TABLE, rows.len());
        Ok(rows.len())
    }

    async fn upsert_sponsorships(&self, rows: &[Sponsorship]) -> Result<usize, StoreError> {
        self.check(Sponsorship::TABLE)?;
        let rows = dedupe_by_conflict_key(rows);
        let mut table = self.sponsorships.lock().unwrap();
        for row in &rows {
            table.insert(row.conflict_key(), row.clone());
        }
        drop(table);
        self.record_call(Sponsorship::TABLE, rows.len());
        Ok(rows.len())
    }

    async fn current_member_seeds(&self) -> Result<Vec<MemberSeed>, StoreError> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.current_member)
            .map(MemberSeed::from)
            .collect())
    }

    async fn sample_current_members(&self, limit: usize) -> Result<Vec<MemberRecord>, StoreError> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.current_member)
            .take(limit)
            .cloned()
            .collect())
    }
}
