/// Rate-limited publication of the reading stream
///
/// The reader hands records over through a `watch` channel, which holds a
/// single value: a new record replaces whatever was there and the reader
/// never waits. The dispatcher publishes the first record immediately and
/// afterwards at most one record per tick, always the latest one.
use log::{debug, error, info};
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::models::Record;
use crate::publish::Publisher;

/// Pending-record bookkeeping, independent of any clock
#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: Option<Record>,
    primed: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take in a new record
    ///
    /// The very first record is returned for immediate publication; later
    /// ones replace the pending record and wait for a tick.
    pub fn accept(&mut self, record: Record) -> Option<Record> {
        if !self.primed {
            self.primed = true;
            return Some(record);
        }
        self.pending = Some(record);
        None
    }

    /// Release the pending record, if any arrived since the last release
    pub fn on_tick(&mut self) -> Option<Record> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

async fn publish_all(publishers: &[Box<dyn Publisher>], record: &Record) {
    for publisher in publishers {
        if let Err(e) = publisher.publish(record).await {
            error!("Failed to publish to {}: {}", publisher.name(), e);
        }
    }
}

/// Drive a `Dispatcher` from the reader's hand-off channel and a ticker
///
/// Ticks are counted from the first publication. Returns when the sending
/// side of the channel is dropped; a record still pending at that point is
/// not published.
pub async fn run_dispatcher(
    mut records: watch::Receiver<Option<Record>>,
    period: Duration,
    publishers: Vec<Box<dyn Publisher>>,
) {
    let mut dispatcher = Dispatcher::new();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Publishing at most once every {} seconds", period.as_secs());

    loop {
        tokio::select! {
            changed = records.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = records.borrow_and_update().clone();
                if let Some(first) = latest.and_then(|record| dispatcher.accept(record)) {
                    publish_all(&publishers, &first).await;
                    ticker.reset();
                }
            }
            _ = ticker.tick() => {
                match dispatcher.on_tick() {
                    Some(record) => publish_all(&publishers, &record).await,
                    None => debug!("No new record this interval"),
                }
            }
        }
    }

    if dispatcher.has_pending() {
        debug!("Dropping unpublished record at shutdown");
    }
}
