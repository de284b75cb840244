use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub base_prompt: String,
    pub suggested_tags_json: String,
    pub recommended_model: Option<String>,
    pub aspect_ratio: Option<String>,
    pub steps: Option<i64>,
    pub usage_count: i64,
    pub rating_avg: f64,
    pub rating_count: i64,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCountRow {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub template_id: String,
    pub rating_avg: f64,
    pub rating_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEvent {
    pub template_id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub prompt: String,
    pub used_at: DateTime<Utc>,
}
