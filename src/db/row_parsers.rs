use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, Row, Sqlite, Type};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::rbac::{ActivityEntry, Permission, PermissionAction, Role};
use crate::models::user::DbUser;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // Try RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    // Try date-only format: "YYYY-MM-DD"
    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date.and_hms_opt(0, 0, 0).ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_uuid(&s)?)),
        _ => Ok(None),
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AppError>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    row.try_get(name).map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    let id_s: String = column(row, "id")?;
    let name: String = column(row, "name")?;
    let email: String = column(row, "email")?;
    let password_hash: String = column(row, "password_hash")?;
    let role_id_s: Option<String> = column(row, "role_id")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;
    let deleted_at_s: Option<String> = column(row, "deleted_at")?;

    Ok(DbUser {
        id: parse_uuid(&id_s)?,
        name,
        email,
        password_hash,
        role_id: parse_opt_uuid(role_id_s)?,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
        deleted_at: parse_opt_datetime(deleted_at_s)?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    let id_s: String = column(row, "id")?;
    let name: String = column(row, "name")?;
    let description: Option<String> = column(row, "description")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    Ok(Role {
        id: parse_uuid(&id_s)?,
        name,
        description,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

/// Unknown actions are rejected rather than passed through.
pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    let code: String = column(row, "code")?;
    let module: String = column(row, "module")?;
    let action_s: String = column(row, "action")?;
    let display_name: String = column(row, "display_name")?;
    let description: Option<String> = column(row, "description")?;

    let action = action_s
        .parse::<PermissionAction>()
        .map_err(|e| AppError::internal(format!("permission {}: {}", code, e)))?;

    Ok(Permission { code, module, action, display_name, description })
}

pub fn activity_from_row(row: &SqliteRow) -> Result<ActivityEntry, AppError> {
    let id_s: String = column(row, "id")?;
    let event_name: String = column(row, "event_name")?;
    let description: String = column(row, "description")?;
    let actor_id_s: Option<String> = column(row, "actor_id")?;
    let subject_id_s: Option<String> = column(row, "subject_id")?;
    let occurred_at_s: String = column(row, "occurred_at")?;
    let severity: String = column(row, "severity")?;

    Ok(ActivityEntry {
        id: parse_uuid(&id_s)?,
        event_name,
        description,
        actor_id: parse_opt_uuid(actor_id_s)?,
        subject_id: parse_opt_uuid(subject_id_s)?,
        occurred_at: parse_datetime(&occurred_at_s)?,
        severity,
    })
}
