//! Google Sheet lead import behind `POST /leads/sync-sheet`.

use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{CreateLeadPayload, LeadStage, SyncSheetResponse};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

const DEFAULT_SOURCE: &str = "Google Sheet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Name,
    Email,
    Phone,
    Source,
    Notes,
    FollowUp,
}

fn classify_header(raw: &str) -> Option<Column> {
    let normalized = raw
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    match normalized.as_str() {
        "name" | "full name" | "fullname" | "lead name" => Some(Column::Name),
        "email" | "email address" | "e mail" => Some(Column::Email),
        "phone" | "phone number" | "mobile" | "contact" => Some(Column::Phone),
        "source" | "lead source" => Some(Column::Source),
        "notes" | "message" | "comments" => Some(Column::Notes),
        "follow up" | "followup" | "follow up date" => Some(Column::FollowUp),
        _ => None,
    }
}

/// Turns a sheet share link into a CSV download URL. Non-Google http(s)
/// links are assumed to already serve CSV.
pub fn resolve_export_url(sheet_url: &str) -> AppResult<String> {
    let trimmed = sheet_url.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Sheet URL is required".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|error| AppError::Validation(format!("Invalid sheet URL: {}", error)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "Sheet URL must use http or https, got '{}'",
            parsed.scheme()
        )));
    }

    if parsed.host_str() != Some("docs.google.com") {
        return Ok(trimmed.to_string());
    }

    let segments = parsed
        .path_segments()
        .map(|segments| segments.collect::<Vec<_>>())
        .unwrap_or_default();
    let sheet_id = match segments.as_slice() {
        ["spreadsheets", "d", id, ..] if !id.is_empty() => *id,
        _ => {
            return Err(AppError::Validation(
                "Google Sheets link must look like /spreadsheets/d/<id>".to_string(),
            ))
        }
    };

    let gid = parsed
        .query_pairs()
        .find(|(key, _)| key == "gid")
        .map(|(_, value)| value.into_owned())
        .or_else(|| {
            parsed
                .fragment()
                .and_then(|fragment| fragment.strip_prefix("gid="))
                .map(ToString::to_string)
        })
        .filter(|gid| gid.chars().all(|ch| ch.is_ascii_digit()) && !gid.is_empty());

    let mut export = format!(
        "https://docs.google.com/spreadsheets/d/{}/export?format=csv",
        sheet_id
    );
    if let Some(gid) = gid {
        export.push_str("&gid=");
        export.push_str(&gid);
    }
    Ok(export)
}

/// Maps CSV rows to lead payloads. Rows without any contact detail are dropped.
pub fn parse_sheet_csv(body: &str) -> AppResult<Vec<CreateLeadPayload>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let columns = reader
        .headers()?
        .iter()
        .map(classify_header)
        .collect::<Vec<_>>();
    if !columns.iter().any(|column| matches!(column, Some(Column::Email) | Some(Column::Phone))) {
        return Err(AppError::Validation(
            "Sheet needs an email or phone column".to_string(),
        ));
    }

    let mut leads = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut lead = CreateLeadPayload::default();
        for (column, value) in columns.iter().zip(record.iter()) {
            if value.is_empty() {
                continue;
            }
            match column {
                Some(Column::Name) => lead.name = value.to_string(),
                Some(Column::Email) => lead.email = Some(value.to_string()),
                Some(Column::Phone) => lead.phone = Some(value.to_string()),
                Some(Column::Source) => lead.source = Some(value.to_string()),
                Some(Column::Notes) => lead.notes = Some(value.to_string()),
                Some(Column::FollowUp) => {
                    lead.follow_up_date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
                }
                None => {}
            }
        }

        if lead.email.is_none() && lead.phone.is_none() {
            continue;
        }
        if lead.name.is_empty() {
            lead.name = lead
                .email
                .clone()
                .or_else(|| lead.phone.clone())
                .unwrap_or_default();
        }
        lead.source.get_or_insert_with(|| DEFAULT_SOURCE.to_string());
        lead.stage = Some(LeadStage::New);
        leads.push(lead);
    }

    Ok(leads)
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Drops rows whose email or phone is already known, including earlier rows
/// of the same sheet.
pub fn select_new_leads(
    existing: &[(Option<String>, Option<String>)],
    candidates: Vec<CreateLeadPayload>,
) -> Vec<CreateLeadPayload> {
    let mut emails: HashSet<String> = existing
        .iter()
        .filter_map(|(email, _)| email.as_deref().map(normalize_email))
        .filter(|email| !email.is_empty())
        .collect();
    let mut phones: HashSet<String> = existing
        .iter()
        .filter_map(|(_, phone)| phone.as_deref().map(normalize_phone))
        .filter(|phone| !phone.is_empty())
        .collect();

    let mut fresh = Vec::new();
    for lead in candidates {
        let email = lead.email.as_deref().map(normalize_email).filter(|e| !e.is_empty());
        let phone = lead.phone.as_deref().map(normalize_phone).filter(|p| !p.is_empty());

        let known = email.as_ref().is_some_and(|e| emails.contains(e))
            || phone.as_ref().is_some_and(|p| phones.contains(p));
        if known {
            continue;
        }
        if let Some(email) = email {
            emails.insert(email);
        }
        if let Some(phone) = phone {
            phones.insert(phone);
        }
        fresh.push(lead);
    }
    fresh
}

pub fn sync_message(inserted: usize) -> String {
    if inserted == 0 {
        "No new leads found".to_string()
    } else {
        format!("{} New Leads added", inserted)
    }
}

#[derive(Debug, Clone)]
pub struct SheetImporter {
    http: reqwest::Client,
}

impl SheetImporter {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub async fn fetch_csv(&self, sheet_url: &str) -> AppResult<String> {
        let export_url = resolve_export_url(sheet_url)?;
        let response = self.http.get(&export_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "Sheet download failed with HTTP {}. Make sure the sheet is shared publicly.",
                status.as_u16()
            )));
        }
        Ok(response.text().await?)
    }

    pub async fn sync(&self, db: &Database, owner_id: &str, sheet_url: &str) -> AppResult<SyncSheetResponse> {
        let body = self.fetch_csv(sheet_url).await?;
        let candidates = parse_sheet_csv(&body)?;
        let total_rows = candidates.len();
        let fresh = select_new_leads(&db.lead_contacts(owner_id)?, candidates);
        let inserted = db.insert_leads(owner_id, fresh)?;

        tracing::info!(
            owner_id = %owner_id,
            total_rows,
            inserted,
            "sheet sync finished"
        );

        Ok(SyncSheetResponse {
            success: true,
            message: sync_message(inserted),
        })
    }
}
