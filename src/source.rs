use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::IngestError;
use crate::models::Event;

/// Only objects whose name contains this marker are raw activity batches
pub const RAW_DATA_MARKER: &str = "raw_data";

/// Supplies raw event batches
pub trait SourceReader: Send + Sync {
    /// Identifiers of every raw batch currently available
    fn list_batches(&self) -> Result<Vec<String>, IngestError>;

    /// Parse one batch into an event table
    fn read_batch(&self, batch: &str) -> Result<Vec<Event>, IngestError>;
}

/// A local directory standing in for the object store bucket.
/// Batch identifiers are `/`-separated paths relative to the root.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn collect(&self, dir: &Path, names: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, names)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                names.push(name);
            }
        }
        Ok(())
    }
}

impl SourceReader for DirectorySource {
    fn list_batches(&self) -> Result<Vec<String>, IngestError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        self.collect(&self.root, &mut names)?;
        names.retain(|name| name.contains(RAW_DATA_MARKER));
        names.sort();
        debug!(root = %self.root.display(), batches = names.len(), "listed source batches");
        Ok(names)
    }

    fn read_batch(&self, batch: &str) -> Result<Vec<Event>, IngestError> {
        let path = self.root.join(batch);
        if !path.is_file() {
            return Err(IngestError::MissingBatch(batch.to_string()));
        }
        let file = fs::File::open(&path)?;
        read_events(file, batch)
    }
}

/// Parse a tab-separated event table with a header row
pub fn read_events<R: io::Read>(reader: R, batch: &str) -> Result<Vec<Event>, IngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    rdr.deserialize()
        .collect::<Result<Vec<Event>, _>>()
        .map_err(|source| IngestError::Csv {
            batch: batch.to_string(),
            source,
        })
}

/// Write an event table in the same tab-separated layout
pub fn write_events(path: &Path, events: &[Event]) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let to_csv_error = |source| IngestError::Csv {
        batch: path.display().to_string(),
        source,
    };

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(to_csv_error)?;
    for event in events {
        wtr.serialize(event).map_err(to_csv_error)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "activity_id\ttimestamp\tuser_id\tactivity_stage\tactivity_type\tscore";

    #[test]
    fn test_read_events_with_float_scores_and_nulls() {
        let data = format!(
            "{HEADER}\n\
             1000000001\t1672531200\t123456\tQuiz_start\tQuiz\t\n\
             1000000001\t1672531290\t123456\tQuiz_complete\tQuiz\t80.0\n\
             1000000002\t1672531300\t123456\t\tVideo\t\n"
        );

        let events = read_events(data.as_bytes(), "inline").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].score, None);
        assert_eq!(events[1].score, Some(80));
        assert_eq!(events[2].activity_stage, None);
    }

    #[test]
    fn test_read_events_reports_batch_on_error() {
        let data = format!("{HEADER}\nnot-a-number\t1\t2\tQuiz_start\tQuiz\t\n");
        let err = read_events(data.as_bytes(), "raw_data/bad.tsv").unwrap_err();
        assert!(err.to_string().contains("raw_data/bad.tsv"));
    }

    #[test]
    fn test_list_batches_filters_raw_data() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("raw_data")).unwrap();
        fs::create_dir_all(dir.path().join("exports")).unwrap();
        for name in ["raw_data/data_2.tsv", "raw_data/data_1.tsv", "exports/report.tsv"] {
            let mut file = fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "{HEADER}").unwrap();
        }

        let source = DirectorySource::new(dir.path());
        let batches = source.list_batches().unwrap();
        assert_eq!(batches, vec!["raw_data/data_1.tsv", "raw_data/data_2.tsv"]);
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(&dir.path().join("absent"));
        assert!(source.list_batches().unwrap().is_empty());
    }

    #[test]
    fn test_write_then_read_batch() {
        let dir = TempDir::new().unwrap();
        let events = vec![
            Event::new(1, 10, 1000, "Challenge_start", None),
            Event::new(1, 10, 1060, "Challenge_complete", Some(91)),
        ];
        write_events(&dir.path().join("raw_data/data_7.tsv"), &events).unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.read_batch("raw_data/data_7.tsv").unwrap(), events);
        assert!(matches!(
            source.read_batch("raw_data/nope.tsv"),
            Err(IngestError::MissingBatch(_))
        ));
    }
}
