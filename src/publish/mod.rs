/// Outbound sinks for records released by the dispatcher
use async_trait::async_trait;

use crate::error::PublishError;
use crate::models::Record;

pub mod json_line;
pub mod metrics;

pub use json_line::JsonLinePublisher;
pub use metrics::MetricsClient;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    async fn publish(&self, record: &Record) -> Result<(), PublishError>;
}
