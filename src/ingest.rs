/// The read loop: device lines in, records out to storage and the dispatcher
use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::sync::{oneshot, watch};

use crate::database::{store_record, RecordStore};
use crate::device::parser::parse;
use crate::device::{LineTransport, StreamEvent, StreamHandle};
use crate::error::SessionError;
use crate::models::{InsertOutcome, Record};

/// Who ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The device stopped streaming on its own
    Device,
    /// An operator asked for shutdown and the device confirmed
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub reason: StopReason,
    pub records: u64,
    pub duplicates: u64,
    pub parse_failures: u64,
    pub storage_failures: u64,
}

/// Read until the device reports `OK STP`
///
/// Every parsed record goes to `store` (when configured) and replaces the
/// pending record in `records`. Parse and storage failures are logged and
/// counted without ending the loop. When `stop` fires, `STP` is written
/// and the loop keeps reading until the device confirms.
pub async fn run_ingest<T: LineTransport>(
    stream: &mut StreamHandle<'_, T>,
    mut stop: oneshot::Receiver<()>,
    records: &watch::Sender<Option<Record>>,
    mut store: Option<&mut (dyn RecordStore + '_)>,
) -> Result<IngestSummary, SessionError> {
    let mut stop_armed = true;
    let mut stop_requested = false;
    let mut summary = IngestSummary {
        reason: StopReason::Device,
        records: 0,
        duplicates: 0,
        parse_failures: 0,
        storage_failures: 0,
    };

    loop {
        tokio::select! {
            biased;

            signal = &mut stop, if stop_armed => {
                stop_armed = false;
                if signal.is_ok() {
                    info!("Stop requested, sending STP");
                    stream.request_stop().await?;
                    stop_requested = true;
                }
            }
            event = stream.next_event() => match event? {
                StreamEvent::Quiet => {}
                StreamEvent::Stopped => break,
                StreamEvent::Line(line) => {
                    let reading = match parse(&line) {
                        Ok(reading) => reading,
                        Err(e) => {
                            warn!("Skipping line ({}): {}", e, line);
                            summary.parse_failures += 1;
                            continue;
                        }
                    };
                    let record = Record::new(OffsetDateTime::now_utc(), reading);
                    summary.records += 1;

                    if let Some(store) = store.as_deref_mut() {
                        match store_record(store, &record).await {
                            Ok(InsertOutcome::Inserted) => {}
                            Ok(InsertOutcome::AlreadyPresent) => summary.duplicates += 1,
                            Err(e) => {
                                error!("Failed to store record {}: {}", record.timestamp, e);
                                summary.storage_failures += 1;
                            }
                        }
                    }

                    records.send_replace(Some(record));
                }
            }
        }
    }

    if stop_requested {
        summary.reason = StopReason::Operator;
    }
    Ok(summary)
}
