// crates/alertpipe-store/src/fixtures.rs
// ============================================================================
// Module: Store Fixtures
// Description: Write helpers for seeding tenants/rules/endpoints in tests.
// Purpose: Give this crate's own integration tests (and the `alertpipe
//          migrate --seed` CLI path) a way to set up rows without
//          depending on the CRUD HTTP surface, which this workspace treats
//          as an external collaborator (§4.5).
// Dependencies: alertpipe-core, sqlx, thiserror
// ============================================================================

use alertpipe_core::ChannelKind;
use alertpipe_core::Endpoint;
use alertpipe_core::EndpointId;
use alertpipe_core::Rule;
use alertpipe_core::RuleId;
use thiserror::Error;

use crate::PostgresStore;
use crate::StoreError;

/// Errors specific to fixture seeding.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PostgresStore {
    /// Inserts (or updates, by primary key) a tenant row.
    ///
    /// # Errors
    /// Returns [`FixtureError`] on a transport failure.
    pub async fn seed_tenant(&self, tenant_id: &str, name: &str) -> Result<(), FixtureError> {
        sqlx::query(
            r"
            INSERT INTO tenants (tenant_id, name) VALUES ($1, $2)
            ON CONFLICT (tenant_id) DO UPDATE SET name = EXCLUDED.name
            ",
        )
        .bind(tenant_id)
        .bind(name)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Inserts (or updates) a rule row.
    ///
    /// # Errors
    /// Returns [`FixtureError`] on a transport failure.
    pub async fn seed_rule(&self, rule: &Rule) -> Result<(), FixtureError> {
        sqlx::query(
            r"
            INSERT INTO rules (rule_id, tenant_id, severity, source, name, enabled, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (rule_id) DO UPDATE SET
                severity = EXCLUDED.severity,
                source = EXCLUDED.source,
                name = EXCLUDED.name,
                enabled = EXCLUDED.enabled,
                version = EXCLUDED.version,
                updated_at = now()
            ",
        )
        .bind(rule.rule_id.0)
        .bind(&rule.tenant_id.0)
        .bind(&rule.severity)
        .bind(&rule.source)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(rule.version as i64)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Inserts (or updates) an endpoint row.
    ///
    /// # Errors
    /// Returns [`FixtureError`] on a transport failure.
    pub async fn seed_endpoint(&self, rule_id: RuleId, kind: ChannelKind, target: &str, enabled: bool) -> Result<Endpoint, FixtureError> {
        let endpoint_id = EndpointId(uuid::Uuid::new_v4());
        sqlx::query(
            r"
            INSERT INTO endpoints (endpoint_id, rule_id, kind, target, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (rule_id, kind, target) DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = now()
            ",
        )
        .bind(endpoint_id.0)
        .bind(rule_id.0)
        .bind(kind.as_str())
        .bind(target)
        .bind(enabled)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;
        Ok(Endpoint {
            endpoint_id,
            rule_id,
            kind,
            target: target.to_string(),
            enabled,
        })
    }
}
