use std::thread;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, warn};

use crate::error::{ExtractError, IngestError};
use crate::models::{ActivityType, Event, IngestReport, SessionTable};
use crate::projections::extract_sessions;
use crate::source::{SourceReader, RAW_DATA_MARKER};
use crate::warehouse::{IngestionLog, SinkWriter};

/// Moves new raw batches through the extractor into the sink.
///
/// Collaborators are injected; the ingestor owns no clients of its own.
pub struct Ingestor<'a> {
    bucket: String,
    source: &'a dyn SourceReader,
    log: &'a dyn IngestionLog,
    sink: &'a dyn SinkWriter,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        bucket: &str,
        source: &'a dyn SourceReader,
        log: &'a dyn IngestionLog,
        sink: &'a dyn SinkWriter,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            source,
            log,
            sink,
        }
    }

    /// Ingest every available batch that is not yet in the processing log
    pub fn ingest_new_batches(&self) -> Result<IngestReport, IngestError> {
        info!("Getting file list in bucket");
        let available = self.source.list_batches()?;

        info!("Getting file list in logs table");
        let processed = self.log.processed_batches()?;

        let mut new_batches: Vec<String> = available
            .into_iter()
            .filter(|batch| !processed.contains(batch))
            .collect();
        new_batches.sort();
        new_batches.dedup();

        if new_batches.is_empty() {
            info!("No new files to ingest");
            return Ok(IngestReport::skipped("No files to ingest."));
        }

        info!(count = new_batches.len(), "New files to ingest");
        let mut sessions_written = 0;
        for batch in &new_batches {
            sessions_written += self.ingest_batch(batch)?;
        }

        info!(sessions_written, "Complete");
        Ok(IngestReport {
            status: format!("Files ingested {}", new_batches.len()),
            batches: new_batches,
            sessions_written,
        })
    }

    /// Ingest one batch announced by a storage notification.
    ///
    /// Notifications for other buckets or non-raw objects are ignored. The
    /// processing log is written but not consulted.
    pub fn ingest_notification(&self, bucket: &str, name: &str) -> Result<IngestReport, IngestError> {
        if bucket != self.bucket || !name.contains(RAW_DATA_MARKER) {
            warn!(bucket, name, "ignoring notification");
            return Ok(IngestReport::skipped("No relevant files to ingest."));
        }

        info!(batch = name, "File to ingest");
        let sessions_written = self.ingest_batch(name)?;
        Ok(IngestReport {
            status: "Files ingested: 1".to_string(),
            batches: vec![name.to_string()],
            sessions_written,
        })
    }

    fn ingest_batch(&self, batch: &str) -> Result<usize, IngestError> {
        info!(batch, "Processing file");
        let events = self.source.read_batch(batch)?;
        let tables = process_activities(&events)?;

        // One stamp shared by every table of the batch
        let ingested_at = ingestion_timestamp();

        info!(batch, "Uploading sessions");
        let mut written = 0;
        for table in &tables {
            written += self.sink.append_sessions(table, ingested_at)?;
        }

        info!(batch, "Uploading logs");
        self.log.record_batch(batch, ingested_at)?;
        Ok(written)
    }
}

/// Extract Quiz, Challenge and Video sessions from one event table.
///
/// Each extraction only reads the shared events, so they run side by side.
pub fn process_activities(events: &[Event]) -> Result<Vec<SessionTable>, ExtractError> {
    thread::scope(|scope| {
        let handles: Vec<_> = ActivityType::ALL
            .into_iter()
            .map(|activity| scope.spawn(move || extract_sessions(events, activity)))
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

/// Current UTC time truncated to whole seconds
pub fn ingestion_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
