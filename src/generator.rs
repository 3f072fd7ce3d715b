use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::IngestError;
use crate::models::{ActivityType, Event};
use crate::source::{write_events, RAW_DATA_MARKER};

/// Produces pseudo-random but schema-valid activity logs
pub struct DataGenerator {
    start: NaiveDateTime,
    end: NaiveDateTime,
    rng: StdRng,
}

impl DataGenerator {
    /// Dates are `YYYY-MM-DD`, both read as midnight UTC
    pub fn new(start_date: &str, end_date: &str, seed: u64) -> Result<Self, IngestError> {
        let start = parse_date(start_date)?;
        let end = parse_date(end_date)?;
        if end < start {
            return Err(IngestError::Date(format!("{end_date} is before {start_date}")));
        }
        Ok(Self {
            start,
            end,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Quiz 40%, Video 30%, Challenge 30%
    pub fn activity(&mut self) -> ActivityType {
        match self.rng.gen_range(0..100) {
            0..=39 => ActivityType::Quiz,
            40..=69 => ActivityType::Video,
            _ => ActivityType::Challenge,
        }
    }

    /// Stage following `start`: complete 70%, abandon 20%.
    /// The remaining 10% is `None`, an unfinished activity with no terminal row.
    pub fn terminal_stage(&mut self) -> Option<&'static str> {
        match self.rng.gen_range(0..100) {
            0..=69 => Some("complete"),
            70..=89 => Some("abandon"),
            _ => None,
        }
    }

    /// Uniform instant within `[start, end]`
    pub fn random_timestamp(&mut self) -> NaiveDateTime {
        let range = (self.end - self.start).num_seconds();
        self.start + Duration::seconds(self.rng.gen_range(0..=range))
    }

    /// Move `timestamp` forward by 30 seconds to 2 minutes
    pub fn advance(&mut self, timestamp: NaiveDateTime) -> NaiveDateTime {
        timestamp + Duration::seconds(self.rng.gen_range(30..=120))
    }

    pub fn user_ids(&mut self, count: usize) -> Vec<i64> {
        (0..count).map(|_| self.rng.gen_range(100_000..=999_999)).collect()
    }

    /// Generate activity logs for `num_users` random users
    pub fn generate_records(&mut self, num_users: usize) -> Vec<Event> {
        let mut records = Vec::new();

        for user_id in self.user_ids(num_users) {
            let num_activities = self.rng.gen_range(1..=3);
            for _ in 0..num_activities {
                let activity_id = self.rng.gen_range(1_000_000_000..=9_999_999_999_i64);
                let activity = self.activity();
                let mut timestamp = self.random_timestamp();

                let stages = [Some("start"), self.terminal_stage()];
                for stage in stages {
                    let Some(stage) = stage else {
                        timestamp = self.advance(timestamp);
                        continue;
                    };

                    let score = (activity.is_scorable() && stage == "complete").then(|| self.rng.gen_range(0..=100));
                    records.push(Event {
                        activity_id,
                        timestamp: timestamp.and_utc().timestamp(),
                        user_id,
                        activity_stage: Some(format!("{activity}_{stage}")),
                        activity_type: activity.to_string(),
                        score,
                    });

                    timestamp = self.advance(timestamp);
                }
            }
        }

        records
    }
}

fn parse_date(date: &str) -> Result<NaiveDateTime, IngestError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| IngestError::Date(date.to_string()))
}

/// Batch identifier a generated log is stored under
pub fn batch_name(seed: u64) -> String {
    format!("{RAW_DATA_MARKER}/data_{seed}.tsv")
}

/// Generate a batch and write it below `root`, returning its identifier
pub fn generate_batch(
    root: &Path,
    start_date: &str,
    end_date: &str,
    num_users: usize,
    seed: u64,
) -> Result<String, IngestError> {
    let mut generator = DataGenerator::new(start_date, end_date, seed)?;
    let events = generator.generate_records(num_users);
    let name = batch_name(seed);
    let path: PathBuf = root.join(&name);

    write_events(&path, &events)?;
    info!(batch = %name, events = events.len(), seed, "generated synthetic batch");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DirectorySource, SourceReader};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn generator() -> DataGenerator {
        DataGenerator::new("2023-10-01", "2023-10-31", 1234).unwrap()
    }

    #[test]
    fn test_get_activity() {
        let mut g = generator();
        for _ in 0..50 {
            assert!(ActivityType::ALL.contains(&g.activity()));
        }
    }

    #[test]
    fn test_terminal_stage_never_start() {
        let mut g = generator();
        for _ in 0..200 {
            assert_ne!(g.terminal_stage(), Some("start"));
        }
    }

    #[test]
    fn test_get_timestamp() {
        let mut g = generator();
        let start = parse_date("2023-10-01").unwrap();
        let end = parse_date("2023-10-31").unwrap();
        for _ in 0..50 {
            let ts = g.random_timestamp();
            assert!(start <= ts && ts <= end);
        }
    }

    #[test]
    fn test_update_timestamp() {
        let mut g = generator();
        let base = parse_date("2023-10-29").unwrap();
        let updated = g.advance(base);
        assert!(base + Duration::seconds(30) <= updated);
        assert!(updated <= base + Duration::seconds(120));
    }

    #[test]
    fn test_generate_user_ids() {
        let mut g = generator();
        let ids = g.user_ids(10);
        assert_eq!(ids.len(), 10);
        assert!(ids.iter().all(|id| (100_000..=999_999).contains(id)));
    }

    #[test]
    fn test_generate_records_schema() {
        let mut g = generator();
        let records = g.generate_records(30);

        let mut per_activity: HashMap<i64, Vec<&Event>> = HashMap::new();
        for record in &records {
            per_activity.entry(record.activity_id).or_default().push(record);
        }

        for events in per_activity.values() {
            assert!(events.len() <= 2);
            assert!(events[0].activity_stage.as_deref().is_some_and(|s| s.ends_with("_start")));
            for event in events {
                let stage = event.activity_stage.as_deref().unwrap();
                assert!(stage.starts_with(&format!("{}_", event.activity_type)));
                let scored = event.score.is_some();
                let completion = stage.ends_with("_complete") && event.activity_type != "Video";
                assert_eq!(scored, completion);
                if let Some(score) = event.score {
                    assert!((0..=100).contains(&score));
                }
            }
        }
    }

    #[test]
    fn test_same_seed_same_records() {
        let a = generator().generate_records(5);
        let b = generator().generate_records(5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_dates() {
        assert!(DataGenerator::new("2023-13-01", "2023-12-31", 1).is_err());
        assert!(DataGenerator::new("2023-12-31", "2023-01-01", 1).is_err());
    }

    #[test]
    fn test_generate_batch_is_listed() {
        let dir = TempDir::new().unwrap();
        let name = generate_batch(dir.path(), "2023-01-01", "2023-01-31", 5, 99).unwrap();
        assert_eq!(name, "raw_data/data_99.tsv");

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.list_batches().unwrap(), vec![name.clone()]);
        assert!(!source.read_batch(&name).unwrap().is_empty());
    }
}
