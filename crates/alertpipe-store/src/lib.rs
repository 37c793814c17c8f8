#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-store/src/lib.rs
// ============================================================================
// Module: Relational Store
// Description: Postgres-backed persistence for tenants, rules, endpoints,
//              and notifications.
// Purpose: Own the durable state the rest of the pipeline is derived from
//          (§3's "ownership" rule), and implement the idempotency boundary
//          (§3, UNIQUE(tenant_id, alert_id)) as a database constraint rather
//          than in-process bookkeeping.
// Dependencies: alertpipe-core, async-trait, serde_json, sqlx, thiserror, uuid
// ============================================================================

//! ## Overview
//! This crate is the only place that knows the relational schema
//! (`migrations/0001_init.sql`). Every other crate programs against
//! [`RuleStore`], [`EndpointStore`], and [`NotificationStore`], so unit
//! tests elsewhere can fake persistence without a Postgres instance; only
//! this crate's own `tests/` directory needs a real database.
//!
//! [`NotificationStore::insert_if_absent`] is where §3's idempotency
//! invariant actually lives: the insert is an `INSERT ... ON CONFLICT
//! (tenant_id, alert_id) DO UPDATE ... RETURNING`, and the caller gets back
//! both whether its row was the one that landed and the *persisted* row's
//! id — which on conflict is the id of whichever row landed first, not the
//! caller's own. A redelivered insert must key off that id, not a fresh one
//! it generated locally, or a readiness event published against the fresh
//! id would point at a notification row that was never written.

mod fixtures;

use std::collections::HashMap;

use alertpipe_core::AlertId;
use alertpipe_core::ChannelKind;
use alertpipe_core::Endpoint;
use alertpipe_core::EndpointId;
use alertpipe_core::Notification;
use alertpipe_core::NotificationId;
use alertpipe_core::NotificationStatus;
use alertpipe_core::Rule;
use alertpipe_core::RuleId;
use alertpipe_core::TenantId;
use alertpipe_core::Timestamp;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use uuid::Uuid;

pub use fixtures::FixtureError;

/// Errors raised by the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database connection or a query failed at the transport level.
    #[error("store io error: {0}")]
    Io(String),
    /// A row existed but could not be decoded into its domain type,
    /// indicating the schema and the domain model have drifted apart.
    #[error("store decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Io(err.to_string())
    }
}

/// Outcome of [`NotificationStore::insert_if_absent`]. Both variants carry
/// the *persisted* notification id: on [`InsertOutcome::AlreadyExists`],
/// this is the id of the row that landed first, which may not be the id on
/// the [`Notification`] the caller passed in (§4.3, redelivery).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// No row previously existed for `(tenant_id, alert_id)`; this call's
    /// row is now the authoritative one.
    Inserted(NotificationId),
    /// A row already existed for `(tenant_id, alert_id)`; nothing was
    /// written (§4.3, "treat as success"). Carries that row's id.
    AlreadyExists(NotificationId),
}

impl InsertOutcome {
    /// The persisted notification id, regardless of which branch landed.
    #[must_use]
    pub fn notification_id(self) -> NotificationId {
        match self {
            Self::Inserted(id) | Self::AlreadyExists(id) => id,
        }
    }
}

/// Read access to rules, used by the Snapshot Builder (§4.1).
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Fetches a single rule by id, regardless of its enabled flag (the
    /// Snapshot Builder decides what to do with a disabled rule itself).
    ///
    /// # Errors
    /// Returns [`StoreError`] on a transport or decode failure.
    async fn get_rule(&self, rule_id: RuleId) -> Result<Option<Rule>, StoreError>;

    /// Fetches every enabled rule, for a cold-start full rebuild (§4.1).
    ///
    /// # Errors
    /// Returns [`StoreError`] on a transport or decode failure.
    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, StoreError>;
}

/// Read access to endpoints, used by the Dispatcher (§4.4).
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// Fetches every endpoint owned by any of `rule_ids`.
    ///
    /// # Errors
    /// Returns [`StoreError`] on a transport or decode failure.
    async fn endpoints_for_rules(&self, rule_ids: &[RuleId]) -> Result<Vec<Endpoint>, StoreError>;
}

/// Read/write access to notifications, used by the Deduplicator (§4.3) and
/// the Dispatcher (§4.4).
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Inserts `notification` unless a row already exists for its
    /// `(tenant_id, alert_id)`.
    ///
    /// # Errors
    /// Returns [`StoreError`] on a transport or decode failure.
    async fn insert_if_absent(&self, notification: &Notification) -> Result<InsertOutcome, StoreError>;

    /// Loads a notification by id.
    ///
    /// # Errors
    /// Returns [`StoreError`] on a transport or decode failure.
    async fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>, StoreError>;

    /// Advances `id`'s status. Callers are responsible for respecting
    /// monotonicity (§3); this call does not itself check the prior status.
    ///
    /// # Errors
    /// Returns [`StoreError`] on a transport or decode failure.
    async fn update_status(&self, id: NotificationId, status: NotificationStatus, updated_at: Timestamp) -> Result<(), StoreError>;
}

/// The Postgres-backed implementation of every store trait in this crate.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an already-constructed pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a new pool against `database_url`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the pool cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Runs the embedded migrations (`migrations/0001_init.sql` and later).
    ///
    /// # Errors
    /// Returns [`StoreError`] if any migration fails to apply.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_rule(row: &sqlx::postgres::PgRow) -> Result<Rule, StoreError> {
    let rule_id: Uuid = row.try_get("rule_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let tenant_id: String = row.try_get("tenant_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let version: i64 = row.try_get("version").map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(Rule {
        rule_id: RuleId(rule_id),
        tenant_id: TenantId::from(tenant_id),
        severity: row.try_get("severity").map_err(|e| StoreError::Decode(e.to_string()))?,
        source: row.try_get("source").map_err(|e| StoreError::Decode(e.to_string()))?,
        name: row.try_get("name").map_err(|e| StoreError::Decode(e.to_string()))?,
        enabled: row.try_get("enabled").map_err(|e| StoreError::Decode(e.to_string()))?,
        version: version.max(0) as u64,
    })
}

fn row_to_endpoint(row: &sqlx::postgres::PgRow) -> Result<Endpoint, StoreError> {
    let endpoint_id: Uuid = row.try_get("endpoint_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let rule_id: Uuid = row.try_get("rule_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let kind: String = row.try_get("kind").map_err(|e| StoreError::Decode(e.to_string()))?;
    let kind = ChannelKind::parse(&kind).ok_or_else(|| StoreError::Decode(format!("unrecognized channel kind {kind:?}")))?;
    Ok(Endpoint {
        endpoint_id: EndpointId(endpoint_id),
        rule_id: RuleId(rule_id),
        kind,
        target: row.try_get("target").map_err(|e| StoreError::Decode(e.to_string()))?,
        enabled: row.try_get("enabled").map_err(|e| StoreError::Decode(e.to_string()))?,
    })
}

fn row_to_notification(row: &sqlx::postgres::PgRow) -> Result<Notification, StoreError> {
    let notification_id: Uuid = row.try_get("notification_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let tenant_id: String = row.try_get("tenant_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let alert_id: Uuid = row.try_get("alert_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let rule_ids: serde_json::Value = row.try_get("rule_ids").map_err(|e| StoreError::Decode(e.to_string()))?;
    let matched_rule_ids: Vec<RuleId> = serde_json::from_value::<Vec<Uuid>>(rule_ids)
        .map_err(|e| StoreError::Decode(e.to_string()))?
        .into_iter()
        .map(RuleId)
        .collect();
    let payload: serde_json::Value = row.try_get("payload").map_err(|e| StoreError::Decode(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| StoreError::Decode(e.to_string()))?;
    let status = match status.as_str() {
        "RECEIVED" => NotificationStatus::Received,
        "SENT" => NotificationStatus::Sent,
        "FAILED" => NotificationStatus::Failed,
        other => return Err(StoreError::Decode(format!("unrecognized notification status {other:?}"))),
    };
    let created_at: time::OffsetDateTime = row.try_get("created_at").map_err(|e| StoreError::Decode(e.to_string()))?;
    let updated_at: time::OffsetDateTime = row.try_get("updated_at").map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(Notification {
        notification_id: NotificationId(notification_id),
        tenant_id: TenantId::from(tenant_id),
        alert_id: AlertId(alert_id),
        matched_rule_ids,
        payload,
        status,
        created_at: Timestamp::new(created_at),
        updated_at: Timestamp::new(updated_at),
    })
}

#[async_trait]
impl RuleStore for PostgresStore {
    async fn get_rule(&self, rule_id: RuleId) -> Result<Option<Rule>, StoreError> {
        let row = sqlx::query("SELECT rule_id, tenant_id, severity, source, name, enabled, version FROM rules WHERE rule_id = $1")
            .bind(rule_id.0)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_rule).transpose()
    }

    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query("SELECT rule_id, tenant_id, severity, source, name, enabled, version FROM rules WHERE enabled")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_rule).collect()
    }
}

#[async_trait]
impl EndpointStore for PostgresStore {
    async fn endpoints_for_rules(&self, rule_ids: &[RuleId]) -> Result<Vec<Endpoint>, StoreError> {
        if rule_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rule_ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query("SELECT endpoint_id, rule_id, kind, target, enabled FROM endpoints WHERE rule_id = ANY($1)")
            .bind(ids)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_endpoint).collect()
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert_if_absent(&self, notification: &Notification) -> Result<InsertOutcome, StoreError> {
        let rule_ids: Vec<Uuid> = notification.matched_rule_ids.iter().map(|id| id.0).collect();
        let rule_ids_json = serde_json::to_value(rule_ids).map_err(|e| StoreError::Decode(e.to_string()))?;
        // `DO UPDATE SET updated_at = notifications.updated_at` is a no-op
        // write (it sets the column to its own current value) whose only
        // purpose is making the conflicting row eligible for `RETURNING`;
        // `xmax = 0` is then true only for the row this statement itself
        // inserted, which is how the two outcomes are told apart.
        let row = sqlx::query(
            r"
            INSERT INTO notifications (
                notification_id, tenant_id, alert_id, rule_ids, payload, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, alert_id) DO UPDATE SET updated_at = notifications.updated_at
            RETURNING notification_id, (xmax = 0) AS inserted
            ",
        )
        .bind(notification.notification_id.0)
        .bind(&notification.tenant_id.0)
        .bind(notification.alert_id.0)
        .bind(rule_ids_json)
        .bind(&notification.payload)
        .bind("RECEIVED")
        .bind(notification.created_at.as_offset_date_time())
        .bind(notification.updated_at.as_offset_date_time())
        .fetch_one(self.pool())
        .await?;

        let persisted_id: Uuid = row.try_get("notification_id").map_err(|e| StoreError::Decode(e.to_string()))?;
        let inserted: bool = row.try_get("inserted").map_err(|e| StoreError::Decode(e.to_string()))?;
        let persisted_id = NotificationId(persisted_id);
        Ok(if inserted { InsertOutcome::Inserted(persisted_id) } else { InsertOutcome::AlreadyExists(persisted_id) })
    }

    async fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        let row = sqlx::query(
            "SELECT notification_id, tenant_id, alert_id, rule_ids, payload, status, created_at, updated_at FROM notifications WHERE notification_id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_notification).transpose()
    }

    async fn update_status(&self, id: NotificationId, status: NotificationStatus, updated_at: Timestamp) -> Result<(), StoreError> {
        let status_str = match status {
            NotificationStatus::Received => "RECEIVED",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Failed => "FAILED",
        };
        sqlx::query("UPDATE notifications SET status = $1, updated_at = $2 WHERE notification_id = $3")
            .bind(status_str)
            .bind(updated_at.as_offset_date_time())
            .bind(id.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

/// Index of endpoints by `(kind, target)`, used by the Dispatcher to collapse
/// duplicate deliveries across multiple matched rules (§4.4, step 3).
#[must_use]
pub fn dedupe_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen: HashMap<(ChannelKind, String), ()> = HashMap::new();
    let mut deduped = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let key = (endpoint.kind, endpoint.target.clone());
        if seen.insert(key, ()).is_none() {
            deduped.push(endpoint);
        }
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(kind: ChannelKind, target: &str) -> Endpoint {
        Endpoint {
            endpoint_id: EndpointId(Uuid::new_v4()),
            rule_id: RuleId(Uuid::new_v4()),
            kind,
            target: target.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn dedupe_endpoints_collapses_same_kind_and_target() {
        let endpoints = vec![
            endpoint(ChannelKind::ChatWebhook, "https://hooks.example/a"),
            endpoint(ChannelKind::ChatWebhook, "https://hooks.example/a"),
            endpoint(ChannelKind::Email, "ops@example.org"),
        ];
        let deduped = dedupe_endpoints(endpoints);
        assert_eq!(deduped.len(), 2);
    }
}
