use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The singleton link settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    #[serde(default)]
    pub link: String,
    /// `None` until the first successful write.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The singleton click counter document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickAnalytics {
    #[serde(default)]
    pub total_clicks: u64,
    #[serde(default)]
    pub last_clicked_at: DateTime<Utc>,
    #[serde(default)]
    pub clicks_today: u64,
    #[serde(default)]
    pub clicks_this_week: u64,
    #[serde(default)]
    pub clicks_this_month: u64,
}

impl ClickAnalytics {
    /// What readers see before the first click, or when the store is down.
    pub fn zeroed(now: DateTime<Utc>) -> Self {
        Self {
            total_clicks: 0,
            last_clicked_at: now,
            clicks_today: 0,
            clicks_this_week: 0,
            clicks_this_month: 0,
        }
    }

    /// The document written by the very first recorded click.
    pub fn first_click(now: DateTime<Utc>) -> Self {
        Self {
            total_clicks: 1,
            last_clicked_at: now,
            clicks_today: 1,
            clicks_this_week: 1,
            clicks_this_month: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn analytics_uses_camel_case_fields() {
        let at: DateTime<Utc> = "2026-03-04T10:00:00Z".parse().unwrap();
        let value = serde_json::to_value(ClickAnalytics::first_click(at)).unwrap();
        assert_eq!(value["totalClicks"], json!(1));
        assert_eq!(value["clicksThisMonth"], json!(1));
        assert_eq!(value["lastClickedAt"], json!("2026-03-04T10:00:00Z"));
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let analytics: ClickAnalytics =
            serde_json::from_value(json!({ "totalClicks": 7 })).unwrap();
        assert_eq!(analytics.total_clicks, 7);
        assert_eq!(analytics.clicks_today, 0);
        assert_eq!(analytics.last_clicked_at, DateTime::<Utc>::default());

        let config: LinkConfig = serde_json::from_value(json!({ "link": "x" })).unwrap();
        assert_eq!(config.updated_at, None);
    }
}
