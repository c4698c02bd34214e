use super::{
    account_conflict, lease_conflict, principal_has_lease, AccountReader, AccountWriter, LeaseReader, LeaseWriter,
    RecordStore, UsageStore,
};
use crate::models::{
    Account, AccountStatus, Lease, LeasePage, LeaseQuery, LeaseStatus, LeaseStatusReason, Usage,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{
        FindOneAndUpdateOptions, FindOptions, IndexOptions, ReplaceOptions, ReturnDocument,
    },
    Client as MongoClient, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::time::Duration;

/// Usage row plus a BSON date the TTL index can reap on.
#[derive(Debug, Serialize, Deserialize)]
struct UsageDocument {
    #[serde(flatten)]
    usage: Usage,
    expires_at: BsonDateTime,
}

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

const DUPLICATE_KEY: i32 = 11000;

/// Statuses that hold a principal's claim, i.e. every status but `Inactive`.
const LIVE_LEASE_STATUSES: [LeaseStatus; 4] = [
    LeaseStatus::Active,
    LeaseStatus::FinanceLock,
    LeaseStatus::ResetLock,
    LeaseStatus::ResetFinanceLock,
];

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    match &*e.kind {
        ErrorKind::Write(WriteFailure::WriteError(err)) => err.code == DUPLICATE_KEY,
        ErrorKind::Command(err) => err.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn live_principal_index() -> IndexModel {
    let live: Vec<&str> = LIVE_LEASE_STATUSES.iter().map(|s| s.as_str()).collect();
    IndexModel::builder()
        .keys(doc! { "principal_id": 1 })
        .options(
            IndexOptions::builder()
                .name("live_principal_idx".to_string())
                .unique(true)
                .partial_filter_expression(doc! { "status": { "$in": live } })
                .build(),
        )
        .build()
}

fn db_error(context: &str, e: mongodb::error::Error) -> AppError {
    tracing::error!("{}: {}", context, e);
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri)
            .await
            .map_err(|e| db_error("Failed to connect to MongoDB", e))?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for lease-service");

        let lease_indexes = [
            IndexModel::builder()
                .keys(doc! { "account_id": 1, "principal_id": 1 })
                .options(
                    IndexOptions::builder()
                        .name("account_principal_idx".to_string())
                        .unique(true)
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(
                    IndexOptions::builder()
                        .name("lease_id_idx".to_string())
                        .unique(true)
                        .build(),
                )
                .build(),
            live_principal_index(),
            IndexModel::builder()
                .keys(doc! { "status": 1 })
                .options(IndexOptions::builder().name("status_idx".to_string()).build())
                .build(),
        ];
        self.leases()
            .create_indexes(lease_indexes, None)
            .await
            .map_err(|e| db_error("Failed to create lease indexes", e))?;

        let account_status = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("account_status_idx".to_string())
                    .build(),
            )
            .build();
        let account_id = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(
                IndexOptions::builder()
                    .name("account_id_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.accounts()
            .create_indexes([account_status, account_id], None)
            .await
            .map_err(|e| db_error("Failed to create account indexes", e))?;

        let usage_key = IndexModel::builder()
            .keys(doc! { "principal_id": 1, "account_id": 1, "start_date": 1 })
            .options(
                IndexOptions::builder()
                    .name("usage_key_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        let usage_ttl = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("usage_ttl_idx".to_string())
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();
        self.usage()
            .create_indexes([usage_key, usage_ttl], None)
            .await
            .map_err(|e| db_error("Failed to create usage indexes", e))?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    fn leases(&self) -> Collection<Lease> {
        self.db.collection("leases")
    }

    fn accounts(&self) -> Collection<Account> {
        self.db.collection("accounts")
    }

    fn usage(&self) -> Collection<UsageDocument> {
        self.db.collection("usage")
    }

    async fn find_leases(&self, filter: Document) -> Result<Vec<Lease>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "account_id": 1, "principal_id": 1 })
            .build();
        let cursor = self
            .leases()
            .find(filter, options)
            .await
            .map_err(|e| db_error("Failed to query leases", e))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| db_error("Failed to read leases", e))
    }
}

fn lease_query_filter(query: &LeaseQuery) -> Document {
    let mut filter = Document::new();
    if let Some(principal_id) = &query.principal_id {
        filter.insert("principal_id", principal_id.as_str());
    }
    if let Some(account_id) = &query.account_id {
        filter.insert("account_id", account_id.as_str());
    }
    if let Some(status) = query.status {
        filter.insert("status", status.as_str());
    }
    match (&query.next_account_id, &query.next_principal_id) {
        (Some(account), Some(principal)) => {
            filter.insert(
                "$or",
                vec![
                    doc! { "account_id": { "$gt": account.as_str() } },
                    doc! {
                        "account_id": account.as_str(),
                        "principal_id": { "$gte": principal.as_str() },
                    },
                ],
            );
        }
        (Some(account), None) => {
            let bound = match &query.account_id {
                Some(account_id) => doc! { "$eq": account_id.as_str(), "$gte": account.as_str() },
                None => doc! { "$gte": account.as_str() },
            };
            filter.insert("account_id", bound);
        }
        _ => {}
    }
    filter
}

#[async_trait]
impl LeaseReader for MongoStore {
    async fn get_lease(&self, id: &str) -> Result<Option<Lease>, AppError> {
        self.leases()
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(|e| db_error("Failed to find lease", e))
    }

    async fn list_leases(&self, query: &LeaseQuery) -> Result<LeasePage, AppError> {
        let limit = query.effective_limit();
        let options = FindOptions::builder()
            .sort(doc! { "account_id": 1, "principal_id": 1 })
            .limit(limit + 1)
            .build();
        let cursor = self
            .leases()
            .find(lease_query_filter(query), options)
            .await
            .map_err(|e| db_error("Failed to list leases", e))?;
        let sorted: Vec<Lease> = cursor
            .try_collect()
            .await
            .map_err(|e| db_error("Failed to read leases", e))?;
        Ok(LeasePage::from_sorted(sorted, limit))
    }

    async fn list_leases_by_account(&self, account_id: &str) -> Result<Vec<Lease>, AppError> {
        self.find_leases(doc! { "account_id": account_id }).await
    }

    async fn list_leases_by_principal(&self, principal_id: &str) -> Result<Vec<Lease>, AppError> {
        self.find_leases(doc! { "principal_id": principal_id }).await
    }
}

#[async_trait]
impl LeaseWriter for MongoStore {
    async fn put_lease(&self, lease: &Lease) -> Result<(), AppError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.leases()
            .replace_one(
                doc! { "account_id": &lease.account_id, "principal_id": &lease.principal_id },
                lease,
                options,
            )
            .await
            .map_err(|e| db_error("Failed to put lease", e))?;
        Ok(())
    }

    async fn create_lease(&self, lease: &Lease) -> Result<(), AppError> {
        // Only an Inactive lease under the same key may be replaced. Any
        // other collision trips a unique index and is reported as taken.
        let options = ReplaceOptions::builder().upsert(true).build();
        match self
            .leases()
            .replace_one(
                doc! {
                    "account_id": &lease.account_id,
                    "principal_id": &lease.principal_id,
                    "status": LeaseStatus::Inactive.as_str(),
                },
                lease,
                options,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(principal_has_lease(&lease.principal_id)),
            Err(e) => Err(db_error("Failed to create lease", e)),
        }
    }

    async fn transition_lease_status(
        &self,
        account_id: &str,
        principal_id: &str,
        from: LeaseStatus,
        to: LeaseStatus,
        reason: LeaseStatusReason,
        now: i64,
    ) -> Result<Lease, AppError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .leases()
            .find_one_and_update(
                doc! {
                    "account_id": account_id,
                    "principal_id": principal_id,
                    "status": from.as_str(),
                },
                doc! {
                    "$set": {
                        "status": to.as_str(),
                        "status_reason": reason.as_str(),
                        "last_modified_on": now,
                        "status_modified_on": now,
                    }
                },
                options,
            )
            .await
            .map_err(|e| db_error("Failed to transition lease", e))?;

        updated.ok_or_else(|| lease_conflict(account_id, principal_id, from, to))
    }
}

#[async_trait]
impl AccountReader for MongoStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError> {
        self.accounts()
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(|e| db_error("Failed to find account", e))
    }

    async fn list_accounts_by_status(
        &self,
        status: AccountStatus,
    ) -> Result<Vec<Account>, AppError> {
        let options = FindOptions::builder().sort(doc! { "id": 1 }).build();
        let cursor = self
            .accounts()
            .find(doc! { "status": status.as_str() }, options)
            .await
            .map_err(|e| db_error("Failed to list accounts", e))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| db_error("Failed to read accounts", e))
    }
}

#[async_trait]
impl AccountWriter for MongoStore {
    async fn put_account(&self, account: &Account) -> Result<(), AppError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.accounts()
            .replace_one(doc! { "id": &account.id }, account, options)
            .await
            .map_err(|e| db_error("Failed to put account", e))?;
        Ok(())
    }

    async fn transition_account_status(
        &self,
        id: &str,
        from: AccountStatus,
        to: AccountStatus,
        now: i64,
    ) -> Result<Account, AppError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .accounts()
            .find_one_and_update(
                doc! { "id": id, "status": from.as_str() },
                doc! {
                    "$set": {
                        "status": to.as_str(),
                        "last_modified_on": now,
                    }
                },
                options,
            )
            .await
            .map_err(|e| db_error("Failed to transition account", e))?;

        updated.ok_or_else(|| account_conflict(id, from, to))
    }
}

#[async_trait]
impl UsageStore for MongoStore {
    async fn put_usage(&self, usage: &Usage) -> Result<(), AppError> {
        let document = UsageDocument {
            usage: usage.clone(),
            expires_at: BsonDateTime::from_millis(usage.time_to_live.saturating_mul(1000)),
        };
        let options = ReplaceOptions::builder().upsert(true).build();
        self.usage()
            .replace_one(
                doc! {
                    "principal_id": &usage.principal_id,
                    "account_id": &usage.account_id,
                    "start_date": usage.start_date,
                },
                document,
                options,
            )
            .await
            .map_err(|e| db_error("Failed to put usage", e))?;
        Ok(())
    }

    async fn usage_by_date_range(&self, start: i64, end: i64) -> Result<Vec<Usage>, AppError> {
        let cursor = self
            .usage()
            .find(doc! { "start_date": { "$gte": start, "$lte": end } }, None)
            .await
            .map_err(|e| db_error("Failed to query usage", e))?;
        let rows: Vec<UsageDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| db_error("Failed to read usage", e))?;
        Ok(rows.into_iter().map(|row| row.usage).collect())
    }
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| db_error("MongoDB health check failed", e))?;
        Ok(())
    }
}
