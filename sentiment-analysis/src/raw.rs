//! Loosely-typed shapes of model output. Every field is optional and a field
//! of the wrong type reads as absent, so deserialization of an object never
//! fails; [`crate::normalize`] turns these into the fixed schema.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// String form of a scalar JSON value; `None` for null.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAnalysis {
    #[serde(default, deserialize_with = "lenient")]
    pub sentiment_label: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub sentiment_summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub themes: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient")]
    pub pain_points: Option<Vec<RawInsight>>,
    #[serde(default, deserialize_with = "lenient")]
    pub wins: Option<Vec<RawInsight>>,
}

impl RawAnalysis {
    pub fn from_map(map: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(map)).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInsight {
    Text(String),
    Item(RawInsightItem),
    Other(Value),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInsightItem {
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub point: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub evidence: Option<RawEvidence>,
    #[serde(default)]
    pub post_id: Option<Value>,
    #[serde(default)]
    pub source_post_id: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl RawInsightItem {
    /// First non-blank of `text`, `summary`, `point`, `title`.
    pub fn display_text(&self) -> String {
        [&self.text, &self.summary, &self.point, &self.title]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for value in [&self.post_id, &self.source_post_id, &self.id]
            .into_iter()
            .flatten()
        {
            if let Some(id) = value_text(value).map(|s| s.trim().to_string()) {
                if !id.is_empty() && !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEvidence {
    One(String),
    Many(Vec<Value>),
}

impl RawEvidence {
    pub fn candidates(&self) -> Vec<String> {
        match self {
            RawEvidence::One(s) => vec![s.clone()],
            RawEvidence::Many(values) => values.iter().filter_map(value_text).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBullets {
    Text(String),
    List(Vec<Value>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBreakdownRow {
    #[serde(default, deserialize_with = "lenient")]
    pub subreddit: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub sentiment_label: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub summary_bullets: Option<RawBullets>,
    #[serde(default, deserialize_with = "lenient")]
    pub top_themes: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient")]
    pub top_pain_points: Option<Vec<RawInsight>>,
    #[serde(default, deserialize_with = "lenient")]
    pub top_wins: Option<Vec<RawInsight>>,
}

/// Rows of a breakdown reply: `{"breakdown": [...]}`, the same list under
/// `rows`/`subreddits`/`subreddit_breakdown` (optionally nested one level as
/// `{"breakdown": [...]}`), or a bare list. Non-object rows are skipped.
pub fn breakdown_rows(payload: &Value) -> Vec<RawBreakdownRow> {
    let rows = match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => match map.get("breakdown") {
            Some(Value::Array(items)) => Some(items),
            _ => ["rows", "subreddits", "subreddit_breakdown"]
                .iter()
                .find_map(|key| match map.get(*key) {
                    Some(Value::Array(items)) => Some(items),
                    Some(Value::Object(inner)) => match inner.get("breakdown") {
                        Some(Value::Array(items)) => Some(items),
                        _ => None,
                    },
                    _ => None,
                }),
        },
        _ => None,
    };

    rows.map(|items| {
        items
            .iter()
            .filter(|item| item.is_object())
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    })
    .unwrap_or_default()
}
