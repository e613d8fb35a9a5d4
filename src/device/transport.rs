/// Line-oriented duplex channel to the sensor
use async_trait::async_trait;
use log::debug;
use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::time::{timeout, Duration};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::TransportError;

// UD-CO2S serial framing
const LINE_TERMINATOR: &str = "\r\n";

/// What the session controller needs from the link to the device
#[async_trait]
pub trait LineTransport: Send {
    /// Send one command line; the terminator is appended here
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Wait for the next line, up to the transport's read timeout
    async fn read_line(&mut self) -> Result<String, TransportError>;
}

/// `LineTransport` over any async byte stream
///
/// Lines are split on `\n` with an optional trailing `\r` removed. Bytes that
/// are not valid UTF-8 are replaced rather than rejected, so line noise
/// reaches the parser as an unparsable line instead of failing the link.
pub struct StreamTransport<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    // partial line kept across timed out reads
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        let (reader, writer) = split(stream);
        StreamTransport {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
            read_timeout,
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[async_trait]
impl<S> LineTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        debug!("-> {}", line);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(LINE_TERMINATOR.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        // read_until is cancel safe: bytes read before a timeout stay in
        // `pending` and the next call continues the same line
        let read = timeout(
            self.read_timeout,
            self.reader.read_until(b'\n', &mut self.pending),
        )
        .await;
        match read {
            Err(_) => return Err(TransportError::Timeout),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(0)) if self.pending.is_empty() => return Err(TransportError::Closed),
            Ok(Ok(_)) => {}
        }

        let line = decode_line(&self.pending);
        self.pending.clear();
        Ok(line)
    }
}

/// Open the sensor's serial port (8N1) as a line transport
pub fn open_serial(
    path: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<StreamTransport<SerialStream>, TransportError> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .open_native_async()
        .map_err(std::io::Error::from)?;

    Ok(StreamTransport::new(port, read_timeout))
}
