use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{AnalyticsData, DailyCount, FollowUpToday, LeadStage, NamedCount};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

pub const LEADS_OVER_TIME_DAYS: i64 = 30;

pub fn analytics_data(db: &Database, owner_id: &str, today: NaiveDate) -> AppResult<AnalyticsData> {
    let total_leads = db.count_leads(owner_id)?;
    let new_leads_today = db.count_leads_created_on(owner_id, today)?;

    let stage_counts: HashMap<String, u64> = db
        .count_leads_by_stage(owner_id)?
        .into_iter()
        .map(|entry| (entry.name, entry.value))
        .collect();
    let stage_distribution = LeadStage::ALL
        .into_iter()
        .map(|stage| NamedCount {
            name: stage.as_str().to_string(),
            value: stage_counts.get(stage.as_str()).copied().unwrap_or(0),
        })
        .collect::<Vec<_>>();
    let won_leads = stage_counts.get(LeadStage::Won.as_str()).copied().unwrap_or(0);

    let since = today - Duration::days(LEADS_OVER_TIME_DAYS - 1);
    let daily = db.daily_lead_counts(owner_id, since)?;

    Ok(AnalyticsData {
        total_leads,
        new_leads_today,
        won_leads,
        conversion_rate: conversion_rate(won_leads, total_leads),
        lead_source: db.count_leads_by_source(owner_id)?,
        leads_over_time: zero_fill(since, today, &daily),
        stage_distribution,
    })
}

pub fn follow_up_today(db: &Database, owner_id: &str, today: NaiveDate) -> AppResult<FollowUpToday> {
    let leads = db.leads_with_follow_up_on(owner_id, today)?;
    Ok(FollowUpToday {
        count: leads.len() as u64,
        leads,
    })
}

/// Percentage with one decimal place; 0 when there are no leads.
pub fn conversion_rate(won: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((won as f64 / total as f64) * 1000.0).round() / 10.0
}

fn zero_fill(since: NaiveDate, until: NaiveDate, counts: &[(NaiveDate, u64)]) -> Vec<DailyCount> {
    let by_day: HashMap<NaiveDate, u64> = counts.iter().copied().collect();
    since
        .iter_days()
        .take_while(|day| *day <= until)
        .map(|date| DailyCount {
            date,
            count: by_day.get(&date).copied().unwrap_or(0),
        })
        .collect()
}
