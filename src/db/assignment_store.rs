//! SQLite-backed assignment store.
//!
//! Role grants live in `role_permissions`, direct user grants in
//! `user_permissions`. Every statement binds UUIDs as text.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::authz::{AssignmentOp, AssignmentStore, PermissionCatalog};
use crate::db::row_parsers::{parse_uuid, permission_from_row};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{GrantSet, PrincipalKind, PrincipalRef};

#[derive(Debug, Clone)]
pub struct SqliteAssignmentStore {
    pool: SqlitePool,
}

fn assignment_table(kind: PrincipalKind) -> (&'static str, &'static str) {
    match kind {
        PrincipalKind::Role => ("role_permissions", "role_id"),
        PrincipalKind::User => ("user_permissions", "user_id"),
    }
}

impl SqliteAssignmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load_catalog(&self) -> AppResult<PermissionCatalog> {
        let rows = sqlx::query(
            "SELECT code, module, action, display_name, description FROM permissions ORDER BY module, code",
        )
        .fetch_all(&self.pool)
        .await?;

        let permissions = rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        PermissionCatalog::from_permissions(permissions)
    }

    async fn assigned_codes(&self, principal: PrincipalRef) -> AppResult<Vec<String>> {
        let (table, column) = assignment_table(principal.kind);
        let rows = sqlx::query(&format!(
            "SELECT permission_code FROM {table} WHERE {column} = ?"
        ))
        .bind(principal.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<String, _>("permission_code")).collect())
    }
}

#[async_trait]
impl AssignmentStore for SqliteAssignmentStore {
    async fn principal_exists(&self, principal: PrincipalRef) -> AppResult<bool> {
        let sql = match principal.kind {
            PrincipalKind::Role => "SELECT 1 FROM roles WHERE id = ?",
            PrincipalKind::User => "SELECT 1 FROM users WHERE id = ? AND deleted_at IS NULL",
        };
        let found = sqlx::query_scalar::<_, i64>(sql)
            .bind(principal.id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn grant(&self, principal: PrincipalRef, permission_code: &str) -> AppResult<()> {
        let (table, column) = assignment_table(principal.kind);
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {table} ({column}, permission_code, created_at) VALUES (?, ?, ?)"
        ))
        .bind(principal.id.to_string())
        .bind(permission_code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke(&self, principal: PrincipalRef, permission_code: &str) -> AppResult<()> {
        let (table, column) = assignment_table(principal.kind);
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {column} = ? AND permission_code = ?"
        ))
        .bind(principal.id.to_string())
        .bind(permission_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_module(
        &self,
        principal: PrincipalRef,
        module_codes: &[String],
        codes: &[String],
    ) -> AppResult<Vec<AssignmentOp>> {
        let (table, column) = assignment_table(principal.kind);
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let current: Vec<String> = sqlx::query_scalar::<_, String>(&format!(
            "SELECT permission_code FROM {table} WHERE {column} = ?"
        ))
        .bind(principal.id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        let mut ops = Vec::new();
        for code in module_codes {
            if codes.contains(code) || !current.contains(code) {
                continue;
            }
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE {column} = ? AND permission_code = ?"
            ))
            .bind(principal.id.to_string())
            .bind(code)
            .execute(&mut *tx)
            .await?;
            ops.push(AssignmentOp::revoke(code.as_str()));
        }

        for code in codes {
            if current.contains(code) {
                continue;
            }
            sqlx::query(&format!(
                "INSERT INTO {table} ({column}, permission_code, created_at) VALUES (?, ?, ?)"
            ))
            .bind(principal.id.to_string())
            .bind(code)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ops.push(AssignmentOp::grant(code.as_str()));
        }

        tx.commit().await?;
        Ok(ops)
    }

    async fn load_grants(&self, principal: PrincipalRef) -> AppResult<GrantSet> {
        let assigned = self.assigned_codes(principal).await?.into_iter().collect();

        if principal.kind == PrincipalKind::Role {
            return Ok(GrantSet { assigned, ..Default::default() });
        }

        let role_id = sqlx::query_scalar::<_, Option<String>>("SELECT role_id FROM users WHERE id = ?")
            .bind(principal.id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .flatten();

        let Some(role_id) = role_id else {
            return Ok(GrantSet { assigned, ..Default::default() });
        };
        let role_id = parse_uuid(&role_id)
            .map_err(|e| AppError::internal(format!("user {} has a malformed role: {}", principal.id, e)))?;

        let inherited = self
            .assigned_codes(PrincipalRef::role(role_id))
            .await?
            .into_iter()
            .collect();

        Ok(GrantSet {
            assigned,
            inherited,
            role_id: Some(role_id),
        })
    }
}
