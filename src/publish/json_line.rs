use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::error::PublishError;
use crate::models::Record;
use crate::publish::Publisher;

/// Writes each record as one JSON object per line
///
/// Field order is fixed: `timestamp`, `co2`, `temperature`, `humidity`.
pub struct JsonLinePublisher<W> {
    out: Mutex<W>,
}

impl JsonLinePublisher<Stdout> {
    pub fn stdout() -> Self {
        JsonLinePublisher::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> JsonLinePublisher<W> {
    pub fn new(out: W) -> Self {
        JsonLinePublisher {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Publisher for JsonLinePublisher<W> {
    fn name(&self) -> &'static str {
        "json-line"
    }

    async fn publish(&self, record: &Record) -> Result<(), PublishError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}
