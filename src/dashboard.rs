use crate::client::ApiClient;
use crate::errors::AppResult;
use crate::models::{AnalyticsData, DailyCount, FollowUpToday, LeadRecord, NamedCount};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatCard {
    pub title: &'static str,
    pub value: String,
}

/// Everything the dashboard page renders, built from the two aggregate calls.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub cards: Vec<StatCard>,
    pub lead_source: Vec<NamedCount>,
    pub leads_over_time: Vec<DailyCount>,
    pub stage_distribution: Vec<NamedCount>,
    pub follow_ups: Vec<LeadRecord>,
}

impl DashboardView {
    pub fn compose(analytics: AnalyticsData, follow_ups: FollowUpToday) -> Self {
        let cards = vec![
            StatCard {
                title: "Total Leads",
                value: analytics.total_leads.to_string(),
            },
            StatCard {
                title: "New Today",
                value: analytics.new_leads_today.to_string(),
            },
            StatCard {
                title: "Won",
                value: analytics.won_leads.to_string(),
            },
            StatCard {
                title: "Conversion Rate",
                value: format!("{:.1}%", analytics.conversion_rate),
            },
            StatCard {
                title: "Follow-ups Today",
                value: follow_ups.count.to_string(),
            },
        ];

        Self {
            cards,
            lead_source: analytics.lead_source,
            leads_over_time: analytics.leads_over_time,
            stage_distribution: analytics.stage_distribution,
            follow_ups: follow_ups.leads,
        }
    }

    /// Fetches both aggregates concurrently; either failing fails the load.
    pub async fn load(client: &ApiClient) -> AppResult<Self> {
        let (analytics, follow_ups) = tokio::try_join!(client.analytics_data(), client.follow_up_today())?;
        Ok(Self::compose(analytics, follow_ups))
    }
}
