//! Account tier lookup and storage accounting.
//!
//! Each account has a document at `accounts/{account_id}` carrying its plan
//! and the bytes of storage it currently uses.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use vpipe_models::{AccountUsage, PlanTier};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_conflict;
use crate::types::{Document, Precondition, ToFirestoreValue};

/// Collection path for account documents.
pub const ACCOUNTS_COLLECTION: &str = "accounts";

const PLAN_FIELD: &str = "plan";
const STORAGE_USED_FIELD: &str = "storage_used_bytes";
const UPDATED_AT_FIELD: &str = "updated_at";

/// Account information the pipeline needs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Service tier. Unknown accounts are treated as the lowest tier.
    async fn tier(&self, account_id: &str) -> FirestoreResult<PlanTier>;

    /// Subtract `bytes` from the account's storage counter, floored at zero.
    /// Returns `None` if the account does not exist.
    async fn release_storage(
        &self,
        account_id: &str,
        bytes: u64,
    ) -> FirestoreResult<Option<AccountUsage>>;
}

/// Firestore-backed [`AccountStore`].
#[derive(Clone)]
pub struct AccountRepository {
    client: FirestoreClient,
}

impl AccountRepository {
    /// Maximum attempts for a contended read-modify-write.
    const MAX_UPDATE_RETRIES: u32 = 5;

    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn load(&self, account_id: &str) -> FirestoreResult<Option<Document>> {
        self.client
            .with_retry("read_account", || {
                self.client.get_document(ACCOUNTS_COLLECTION, account_id)
            })
            .await
    }
}

/// Decode the fields the pipeline cares about.
pub fn document_to_usage(account_id: &str, doc: &Document) -> AccountUsage {
    AccountUsage::new(
        account_id,
        doc.get::<String>(PLAN_FIELD)
            .map(|p| PlanTier::from_str(&p))
            .unwrap_or_default(),
        doc.get::<u64>(STORAGE_USED_FIELD).unwrap_or(0),
    )
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn tier(&self, account_id: &str) -> FirestoreResult<PlanTier> {
        Ok(self
            .load(account_id)
            .await?
            .map(|doc| document_to_usage(account_id, &doc).tier)
            .unwrap_or_default())
    }

    async fn release_storage(
        &self,
        account_id: &str,
        bytes: u64,
    ) -> FirestoreResult<Option<AccountUsage>> {
        let mut last_error = None;

        for attempt in 0..Self::MAX_UPDATE_RETRIES {
            let Some(doc) = self.load(account_id).await? else {
                warn!(account_id, "Account missing, nothing to release");
                return Ok(None);
            };

            let mut usage = document_to_usage(account_id, &doc);
            usage.release(bytes);

            let mut fields = HashMap::new();
            fields.insert(
                STORAGE_USED_FIELD.to_string(),
                usage.storage_used_bytes.to_firestore_value(),
            );
            fields.insert(UPDATED_AT_FIELD.to_string(), Utc::now().to_firestore_value());
            let mask = vec![STORAGE_USED_FIELD.to_string(), UPDATED_AT_FIELD.to_string()];

            let precondition = match doc.update_time.as_deref() {
                Some(ts) => Precondition::update_time(ts),
                None => Precondition::exists(),
            };

            match self
                .client
                .update_document(ACCOUNTS_COLLECTION, account_id, fields, &mask, Some(&precondition))
                .await
            {
                Ok(_) => {
                    debug!(
                        account_id,
                        released = bytes,
                        remaining = usage.storage_used_bytes,
                        "Released account storage"
                    );
                    return Ok(Some(usage));
                }
                Err(e) if e.is_precondition_failed() => {
                    debug!(
                        account_id,
                        attempt = attempt + 1,
                        "Account update lost a race, retrying"
                    );
                    record_conflict(ACCOUNTS_COLLECTION);
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        warn!(
            account_id,
            "Storage release failed after {} attempts: {:?}",
            Self::MAX_UPDATE_RETRIES,
            last_error
        );
        Err(FirestoreError::request_failed(format!(
            "Failed to release storage for {} after {} attempts",
            account_id,
            Self::MAX_UPDATE_RETRIES
        )))
    }
}
