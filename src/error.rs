use std::io;

use crate::models::ActivityType;

/// Failures raised by the session extractor
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractError {
    /// The caller asked for an activity type outside Quiz, Challenge and Video.
    #[error("unknown activity type `{name}`{}", did_you_mean(.suggestion))]
    UnknownActivityType {
        name: String,
        suggestion: Option<&'static str>,
    },

    /// An activity stage without the `<Type>_<Stage>` separator.
    #[error("malformed activity stage `{stage}` for activity {activity_id}: expected `<ActivityType>_<Stage>`")]
    MalformedStage { activity_id: i64, stage: String },
}

impl ExtractError {
    pub fn unknown_activity(name: &str) -> Self {
        let suggestion = ActivityType::ALL
            .into_iter()
            .map(|activity| {
                let candidate = activity.as_str();
                let distance = strsim::levenshtein(&name.to_lowercase(), &candidate.to_lowercase());
                (distance, candidate)
            })
            .filter(|(distance, _)| *distance <= 2)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| candidate);

        ExtractError::UnknownActivityType {
            name: name.to_string(),
            suggestion,
        }
    }
}

fn did_you_mean(suggestion: &Option<&'static str>) -> String {
    match suggestion {
        Some(candidate) => format!(" (did you mean `{candidate}`?)"),
        None => String::new(),
    }
}

/// Failures in the ingestion glue around the extractor
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse batch `{batch}`: {source}")]
    Csv {
        batch: String,
        #[source]
        source: csv::Error,
    },

    #[error("warehouse error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("invalid date `{0}`: expected YYYY-MM-DD")]
    Date(String),

    #[error("batch `{0}` does not exist")]
    MissingBatch(String),
}
