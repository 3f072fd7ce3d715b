use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ExtractError;

/// Kind of activity a user performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Quiz,
    Challenge,
    Video,
}

impl ActivityType {
    pub const ALL: [ActivityType; 3] = [ActivityType::Quiz, ActivityType::Challenge, ActivityType::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Quiz => "Quiz",
            ActivityType::Challenge => "Challenge",
            ActivityType::Video => "Video",
        }
    }

    /// Quiz and Challenge carry a score, Video does not
    pub fn is_scorable(self) -> bool {
        matches!(self, ActivityType::Quiz | ActivityType::Challenge)
    }

    /// Destination table in the warehouse
    pub fn table_name(self) -> &'static str {
        match self {
            ActivityType::Quiz => "quiz_table",
            ActivityType::Challenge => "challenge_table",
            ActivityType::Video => "video_table",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityType::ALL
            .into_iter()
            .find(|activity| activity.as_str() == s)
            .ok_or_else(|| ExtractError::unknown_activity(s))
    }
}

/// One row of the raw activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub activity_id: i64,
    pub timestamp: i64,
    pub user_id: i64,
    pub activity_stage: Option<String>,
    pub activity_type: String,
    #[serde(default, deserialize_with = "deserialize_score")]
    pub score: Option<i64>,
}

impl Event {
    pub fn new(
        activity_id: i64,
        user_id: i64,
        timestamp: i64,
        activity_stage: &str,
        score: Option<i64>,
    ) -> Self {
        let activity_type = activity_stage
            .split_once('_')
            .map(|(prefix, _)| prefix)
            .unwrap_or(activity_stage)
            .to_string();

        Self {
            activity_id,
            timestamp,
            user_id,
            activity_stage: Some(activity_stage.to_string()),
            activity_type,
            score,
        }
    }
}

/// Scores may arrive as `80` or `80.0` (float rendering of a nullable int column)
fn deserialize_score<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(Some(value));
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => Ok(Some(value as i64)),
        _ => Err(serde::de::Error::custom(format!("invalid score: {trimmed}"))),
    }
}

/// Session projection (derived from two adjacent events)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub activity_id: i64,
    pub user_id: i64,
    pub start_timestamp: i64,
    pub activity_duration: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

/// Sessions extracted for one activity type
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SessionTable {
    pub activity: ActivityType,
    pub sessions: Vec<Session>,
}

impl SessionTable {
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["activity_id", "user_id", "start_timestamp", "activity_duration", "status"];
        if self.activity.is_scorable() {
            columns.push("score");
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Outcome of an ingestion run
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct IngestReport {
    #[serde(rename = "Status")]
    pub status: String,
    pub batches: Vec<String>,
    pub sessions_written: usize,
}

impl IngestReport {
    pub fn skipped(status: &str) -> Self {
        Self {
            status: status.to_string(),
            batches: Vec::new(),
            sessions_written: 0,
        }
    }
}

/// API Response
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_parse() {
        assert_eq!("Quiz".parse::<ActivityType>().unwrap(), ActivityType::Quiz);
        assert_eq!("Video".parse::<ActivityType>().unwrap(), ActivityType::Video);
        assert!("Lecture".parse::<ActivityType>().is_err());
        // Names are case-sensitive
        assert!("quiz".parse::<ActivityType>().is_err());
    }

    #[test]
    fn test_scorable_types() {
        assert!(ActivityType::Quiz.is_scorable());
        assert!(ActivityType::Challenge.is_scorable());
        assert!(!ActivityType::Video.is_scorable());
    }

    #[test]
    fn test_session_table_columns() {
        let quiz = SessionTable { activity: ActivityType::Quiz, sessions: Vec::new() };
        let video = SessionTable { activity: ActivityType::Video, sessions: Vec::new() };

        assert_eq!(quiz.columns().last(), Some(&"score"));
        assert!(!video.columns().contains(&"score"));
    }

    #[test]
    fn test_video_session_has_no_score_field() {
        let session = Session {
            activity_id: 1,
            user_id: 2,
            start_timestamp: 1000,
            activity_duration: 60,
            status: "abandon".to_string(),
            score: None,
        };

        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("score").is_none());
    }

    #[test]
    fn test_event_new_derives_type() {
        let event = Event::new(7, 8, 1000, "Challenge_complete", Some(55));
        assert_eq!(event.activity_type, "Challenge");
    }
}
