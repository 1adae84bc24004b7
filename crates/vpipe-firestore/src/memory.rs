//! In-memory record and account stores for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use vpipe_models::{AccountUsage, PlanTier, VideoId, VideoRecord, VideoUpdate};

use crate::accounts::AccountStore;
use crate::error::FirestoreResult;
use crate::records::VideoRecordStore;

/// Video records held in a map.
///
/// `vanish_after_checks(n)` simulates a concurrent deletion: the record is
/// removed once `exists` has been called `n` times.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<VideoId, VideoRecord>>,
    vanish_after: Mutex<Option<(VideoId, u32)>>,
    exists_calls: AtomicU32,
    updates: Mutex<Vec<(VideoId, VideoUpdate)>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: VideoRecord) {
        self.records.lock().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &VideoId) -> Option<VideoRecord> {
        self.records.lock().await.get(id).cloned()
    }

    /// Delete `id` as soon as `exists` has been asked `checks` times.
    pub async fn vanish_after_checks(&self, id: &VideoId, checks: u32) {
        *self.vanish_after.lock().await = Some((id.clone(), checks));
    }

    /// Updates that were applied to an existing record, in order.
    pub async fn applied_updates(&self) -> Vec<(VideoId, VideoUpdate)> {
        self.updates.lock().await.clone()
    }

    pub fn exists_calls(&self) -> u32 {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoRecordStore for MemoryRecordStore {
    async fn read(&self, id: &VideoId) -> FirestoreResult<Option<VideoRecord>> {
        Ok(self.get(id).await)
    }

    async fn update(
        &self,
        id: &VideoId,
        update: &VideoUpdate,
    ) -> FirestoreResult<Option<VideoRecord>> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(id) else {
            return Ok(None);
        };

        update.apply_to(record, Utc::now());
        self.updates.lock().await.push((id.clone(), update.clone()));
        Ok(Some(record.clone()))
    }

    async fn exists(&self, id: &VideoId) -> FirestoreResult<bool> {
        let calls = self.exists_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let vanish = matches!(
            &*self.vanish_after.lock().await,
            Some((target, after)) if target == id && calls > *after
        );
        if vanish {
            self.records.lock().await.remove(id);
        }

        Ok(self.records.lock().await.contains_key(id))
    }

    async fn delete(&self, id: &VideoId) -> FirestoreResult<()> {
        self.records.lock().await.remove(id);
        Ok(())
    }
}

/// Accounts held in a map.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, AccountUsage>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, usage: AccountUsage) {
        self.accounts
            .lock()
            .await
            .insert(usage.account_id.clone(), usage);
    }

    pub async fn get(&self, account_id: &str) -> Option<AccountUsage> {
        self.accounts.lock().await.get(account_id).cloned()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn tier(&self, account_id: &str) -> FirestoreResult<PlanTier> {
        Ok(self
            .get(account_id)
            .await
            .map(|usage| usage.tier)
            .unwrap_or_default())
    }

    async fn release_storage(
        &self,
        account_id: &str,
        bytes: u64,
    ) -> FirestoreResult<Option<AccountUsage>> {
        let mut accounts = self.accounts.lock().await;
        Ok(accounts.get_mut(account_id).map(|usage| {
            usage.release(bytes);
            usage.clone()
        }))
    }
}
