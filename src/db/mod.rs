use crate::errors::{AppError, AppResult};
use crate::models::{
    AttachmentRecord, CreateLeadPayload, CreateUserPayload, LeadRecord, LeadStage, NamedCount, PlanLimits,
    SavePlanPayload, SubscriptionPlan, UserRecord, UserRole,
};
use crate::permissions::{PermissionPreset, PermissionSet};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const LEAD_COLUMNS: &str =
    "id, owner_id, name, email, phone, source, stage, notes, follow_up_date, created_at";
const PLAN_COLUMNS: &str =
    "id, name, price, duration, features_json, agent_limit, monthly_lead_limit, is_active, created_at";
const USER_COLUMNS: &str = "id, name, email, role, plan_id, permissions_json, created_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn insert_lead(&self, owner_id: &str, payload: CreateLeadPayload) -> AppResult<LeadRecord> {
        let conn = self.conn()?;
        insert_lead_row(&conn, owner_id, payload, Utc::now())
    }

    /// Inserts all rows in one transaction and returns how many were written.
    pub fn insert_leads(&self, owner_id: &str, payloads: Vec<CreateLeadPayload>) -> AppResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut inserted = 0usize;
        for payload in payloads {
            insert_lead_row(&tx, owner_id, payload, now)?;
            inserted += 1;
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn list_leads(&self, owner_id: &str) -> AppResult<Vec<LeadRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM leads WHERE owner_id = ?1 ORDER BY created_at DESC, id",
            LEAD_COLUMNS
        ))?;
        let rows = stmt.query_map([owner_id], parse_lead_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Raw email and phone values of every lead the owner already has.
    pub fn lead_contacts(&self, owner_id: &str) -> AppResult<Vec<(Option<String>, Option<String>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT email, phone FROM leads WHERE owner_id = ?1")?;
        let rows = stmt.query_map([owner_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn count_leads(&self, owner_id: &str) -> AppResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM leads WHERE owner_id = ?1",
            [owner_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn count_leads_created_on(&self, owner_id: &str, day: NaiveDate) -> AppResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM leads WHERE owner_id = ?1 AND substr(created_at, 1, 10) = ?2",
            params![owner_id, day.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn count_leads_by_source(&self, owner_id: &str) -> AppResult<Vec<NamedCount>> {
        self.grouped_counts(
            "SELECT source, COUNT(1) FROM leads WHERE owner_id = ?1 GROUP BY source ORDER BY COUNT(1) DESC, source",
            owner_id,
        )
    }

    pub fn count_leads_by_stage(&self, owner_id: &str) -> AppResult<Vec<NamedCount>> {
        self.grouped_counts(
            "SELECT stage, COUNT(1) FROM leads WHERE owner_id = ?1 GROUP BY stage",
            owner_id,
        )
    }

    /// Per-day creation counts from `since` onward; days without leads are absent.
    pub fn daily_lead_counts(&self, owner_id: &str, since: NaiveDate) -> AppResult<Vec<(NaiveDate, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 1, 10) AS day, COUNT(1) FROM leads
             WHERE owner_id = ?1 AND substr(created_at, 1, 10) >= ?2
             GROUP BY day ORDER BY day",
        )?;
        let rows = stmt.query_map(params![owner_id, since.to_string()], |row| {
            let day: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((parse_date(&day)?, count.max(0) as u64))
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn leads_with_follow_up_on(&self, owner_id: &str, day: NaiveDate) -> AppResult<Vec<LeadRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM leads WHERE owner_id = ?1 AND follow_up_date = ?2 ORDER BY name",
            LEAD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner_id, day.to_string()], parse_lead_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn grouped_counts(&self, sql: &str, owner_id: &str) -> AppResult<Vec<NamedCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([owner_id], |row| {
            let count: i64 = row.get(1)?;
            Ok(NamedCount {
                name: row.get(0)?,
                value: count.max(0) as u64,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_plan(&self, payload: SavePlanPayload) -> AppResult<SubscriptionPlan> {
        let name = payload.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Plan name cannot be empty".to_string()));
        }
        if !payload.price.is_finite() || payload.price < 0.0 {
            return Err(AppError::Validation(format!("Plan price {} is invalid", payload.price)));
        }

        let plan = SubscriptionPlan {
            id: Uuid::new_v4().to_string(),
            name,
            price: payload.price,
            duration: payload
                .duration
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "monthly".to_string()),
            features: payload.features,
            limits: payload.limits,
            is_active: payload.is_active.unwrap_or(true),
            created_at: Utc::now(),
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subscription_plans (
               id, name, price, duration, features_json, agent_limit, monthly_lead_limit, is_active, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                plan.id,
                plan.name,
                plan.price,
                plan.duration,
                serde_json::to_string(&plan.features)?,
                plan.limits.agents,
                plan.limits.monthly_leads,
                plan.is_active,
                plan.created_at.to_rfc3339(),
            ],
        )
        .map_err(|error| match AppError::from(error) {
            AppError::Conflict(_) => AppError::Conflict(format!("Plan '{}' already exists", plan.name)),
            other => other,
        })?;

        Ok(plan)
    }

    pub fn list_plans(&self, active_only: bool) -> AppResult<Vec<SubscriptionPlan>> {
        let conn = self.conn()?;
        let sql = if active_only {
            format!(
                "SELECT {} FROM subscription_plans WHERE is_active = 1 ORDER BY price, name",
                PLAN_COLUMNS
            )
        } else {
            format!("SELECT {} FROM subscription_plans ORDER BY price, name", PLAN_COLUMNS)
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], parse_plan_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn get_plan(&self, plan_id: &str) -> AppResult<Option<SubscriptionPlan>> {
        let conn = self.conn()?;
        let plan = conn
            .query_row(
                &format!("SELECT {} FROM subscription_plans WHERE id = ?1", PLAN_COLUMNS),
                [plan_id],
                parse_plan_row,
            )
            .optional()?;
        Ok(plan)
    }

    pub fn set_plan_active(&self, plan_id: &str, is_active: bool) -> AppResult<SubscriptionPlan> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE subscription_plans SET is_active = ?1 WHERE id = ?2",
                params![is_active, plan_id],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound(format!("Plan {} not found", plan_id)));
            }
        }
        self.get_plan(plan_id)?
            .ok_or_else(|| AppError::NotFound(format!("Plan {} not found", plan_id)))
    }

    pub fn insert_user(&self, payload: CreateUserPayload) -> AppResult<UserRecord> {
        let name = payload.name.trim().to_string();
        let email = payload.email.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(AppError::Validation("User name cannot be empty".to_string()));
        }
        if !email.contains('@') {
            return Err(AppError::Validation(format!("'{}' is not a valid email", payload.email)));
        }
        if let Some(plan_id) = payload.plan_id.as_deref() {
            if self.get_plan(plan_id)?.is_none() {
                return Err(AppError::NotFound(format!("Plan {} not found", plan_id)));
            }
        }

        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            role: payload.role.unwrap_or(UserRole::Agent),
            plan_id: payload.plan_id,
            permissions: payload
                .preset
                .unwrap_or(PermissionPreset::BasicAgent)
                .permissions(),
            created_at: Utc::now(),
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, name, email, role, plan_id, permissions_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.name,
                user.email,
                user.role.as_str(),
                user.plan_id,
                serde_json::to_string(&user.permissions)?,
                user.created_at.to_rfc3339(),
            ],
        )
        .map_err(|error| match AppError::from(error) {
            AppError::Conflict(_) => AppError::Conflict(format!("User '{}' already exists", user.email)),
            other => other,
        })?;

        Ok(user)
    }

    pub fn get_user(&self, user_id: &str) -> AppResult<Option<UserRecord>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [user_id],
                parse_user_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn update_user_permissions(&self, user_id: &str, permissions: PermissionSet) -> AppResult<UserRecord> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE users SET permissions_json = ?1 WHERE id = ?2",
                params![serde_json::to_string(&permissions)?, user_id],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound(format!("User {} not found", user_id)));
            }
        }
        self.get_user(user_id)?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    /// All rows or none.
    pub fn insert_attachments(&self, records: &[AttachmentRecord]) -> AppResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO attachments (id, owner_id, original_name, stored_name, mime_type, size, path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.owner_id,
                    record.original_name,
                    record.stored_name,
                    record.mime_type,
                    record.size as i64,
                    record.path,
                    record.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_attachments(&self, owner_id: &str) -> AppResult<Vec<AttachmentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, original_name, stored_name, mime_type, size, path, created_at
             FROM attachments WHERE owner_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([owner_id], |row| {
            let size: i64 = row.get(5)?;
            Ok(AttachmentRecord {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                original_name: row.get(2)?,
                stored_name: row.get(3)?,
                mime_type: row.get(4)?,
                size: size.max(0) as u64,
                path: row.get(6)?,
                created_at: parse_time(&row.get::<_, String>(7)?)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

fn insert_lead_row(
    conn: &Connection,
    owner_id: &str,
    payload: CreateLeadPayload,
    created_at: DateTime<Utc>,
) -> AppResult<LeadRecord> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("Lead name cannot be empty".to_string()));
    }

    let lead = LeadRecord {
        id: Uuid::new_v4().to_string(),
        owner_id: owner_id.to_string(),
        name,
        email: non_empty(payload.email),
        phone: non_empty(payload.phone),
        source: non_empty(payload.source).unwrap_or_else(|| "Manual".to_string()),
        stage: payload.stage.unwrap_or(LeadStage::New),
        notes: non_empty(payload.notes),
        follow_up_date: payload.follow_up_date,
        created_at,
    };

    conn.execute(
        "INSERT INTO leads (id, owner_id, name, email, phone, source, stage, notes, follow_up_date, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            lead.id,
            lead.owner_id,
            lead.name,
            lead.email,
            lead.phone,
            lead.source,
            lead.stage.as_str(),
            lead.notes,
            lead.follow_up_date.map(|day| day.to_string()),
            lead.created_at.to_rfc3339(),
        ],
    )?;

    Ok(lead)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_lead_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeadRecord> {
    Ok(LeadRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        source: row.get(5)?,
        stage: parse_stage(&row.get::<_, String>(6)?)?,
        notes: row.get(7)?,
        follow_up_date: row
            .get::<_, Option<String>>(8)?
            .map(|raw| parse_date(&raw))
            .transpose()?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

fn parse_plan_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubscriptionPlan> {
    let features_raw: String = row.get(4)?;
    Ok(SubscriptionPlan {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        duration: row.get(3)?,
        features: serde_json::from_str::<Vec<String>>(&features_raw).unwrap_or_default(),
        limits: PlanLimits {
            agents: row.get(5)?,
            monthly_leads: row.get(6)?,
        },
        is_active: row.get::<_, i32>(7)? != 0,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let permissions_raw: String = row.get(5)?;
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: parse_role(&row.get::<_, String>(3)?)?,
        plan_id: row.get(4)?,
        permissions: serde_json::from_str::<PermissionSet>(&permissions_raw).unwrap_or_default(),
        created_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_stage(raw: &str) -> rusqlite::Result<LeadStage> {
    LeadStage::parse(raw).ok_or_else(|| conversion_error(format!("Unknown lead stage '{}'", raw)))
}

fn parse_role(raw: &str) -> rusqlite::Result<UserRole> {
    UserRole::parse(raw).ok_or_else(|| conversion_error(format!("Unknown user role '{}'", raw)))
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|error| conversion_error(error.to_string()))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}
