/// Command/response handshake and streaming session for the sensor
///
/// The device speaks a tiny line protocol: a command (`STP`, `STA`) is
/// answered by a line starting with `OK` or `NG`. While streaming, telemetry
/// lines are interleaved with those answers, and `OK STP` marks the moment
/// the device has left streaming mode.
use log::{debug, info, warn};
use tokio::time::{sleep, Duration};

use crate::device::transport::LineTransport;
use crate::error::{SessionError, TransportError};

pub const CMD_STOP: &str = "STP";
pub const CMD_START: &str = "STA";
pub const STOPPED_LINE: &str = "OK STP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

/// Classification of the first answer line after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Acknowledged,
    Rejected(String),
    TimedOut,
}

impl Response {
    fn into_result(self, command: &str) -> Result<(), SessionError> {
        match self {
            Response::Acknowledged => Ok(()),
            Response::Rejected(reason) => Err(SessionError::Rejected {
                command: command.to_string(),
                reason,
            }),
            Response::TimedOut => Err(SessionError::TimedOut {
                command: command.to_string(),
            }),
        }
    }
}

/// Classify a line seen while waiting for a command answer
///
/// Anything that is neither `OK*` nor `NG*` belongs to the stream and
/// yields `None`.
pub fn classify(line: &str) -> Option<Response> {
    if line.starts_with("OK") {
        Some(Response::Acknowledged)
    } else if line.starts_with("NG") {
        Some(Response::Rejected(line.to_string()))
    } else {
        None
    }
}

/// One step of the streaming read loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A line that is not a control line, to be parsed as telemetry
    Line(String),
    /// No data within the read timeout
    Quiet,
    /// The device reported `OK STP` and is idle again
    Stopped,
}

/// Owns the transport and the device session state
pub struct SessionController<T> {
    transport: T,
    state: SessionState,
    settle_delay: Duration,
}

impl<T: LineTransport> SessionController<T> {
    pub fn new(transport: T, settle_delay: Duration) -> Self {
        SessionController {
            transport,
            state: SessionState::Idle,
            settle_delay,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bring the device into streaming mode
    ///
    /// Sends `STP` then `STA`; the first rejection or timeout aborts the
    /// sequence and leaves the session idle.
    pub async fn start(&mut self) -> Result<StreamHandle<'_, T>, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state));
        }

        self.state = SessionState::Starting;
        info!("Preparing device: {} {}", CMD_STOP, CMD_START);

        for command in [CMD_STOP, CMD_START] {
            let outcome = match self.exchange(command).await {
                Ok(response) => response.into_result(command),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = outcome {
                self.state = SessionState::Idle;
                return Err(e);
            }
        }

        self.state = SessionState::Streaming;
        info!("Device is streaming");
        Ok(StreamHandle { session: self })
    }

    /// Send a command and wait for its classified answer
    pub async fn exchange(&mut self, command: &str) -> Result<Response, TransportError> {
        self.transport.write_line(command).await?;
        sleep(self.settle_delay).await;
        self.await_response(command).await
    }

    async fn await_response(&mut self, command: &str) -> Result<Response, TransportError> {
        loop {
            let line = match self.transport.read_line().await {
                Ok(line) => line,
                Err(TransportError::Timeout) => return Ok(Response::TimedOut),
                Err(e) => return Err(e),
            };
            match classify(&line) {
                Some(response) => {
                    debug!("<- {} ({:?} for `{}`)", line, response, command);
                    return Ok(response);
                }
                None => debug!("Discarding line while awaiting `{}`: {}", command, line),
            }
        }
    }
}

/// Borrowed view of a session that is streaming or stopping
pub struct StreamHandle<'a, T> {
    session: &'a mut SessionController<T>,
}

impl<T: LineTransport> StreamHandle<'_, T> {
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Read the next line and sort control lines from telemetry
    ///
    /// `OK STP` ends the stream wherever it shows up. While stopping, a
    /// quiet link or an `NG` answer fails the stop handshake.
    pub async fn next_event(&mut self) -> Result<StreamEvent, SessionError> {
        let line = match self.session.transport.read_line().await {
            Ok(line) => line,
            Err(TransportError::Timeout) if self.state() == SessionState::Stopping => {
                return Err(SessionError::TimedOut {
                    command: CMD_STOP.to_string(),
                })
            }
            Err(TransportError::Timeout) => return Ok(StreamEvent::Quiet),
            Err(e) => return Err(e.into()),
        };

        if line.starts_with(STOPPED_LINE) {
            self.session.state = SessionState::Idle;
            info!("Device stopped streaming");
            return Ok(StreamEvent::Stopped);
        }

        if self.state() == SessionState::Stopping && line.starts_with("NG") {
            return Err(SessionError::Rejected {
                command: CMD_STOP.to_string(),
                reason: line,
            });
        }

        Ok(StreamEvent::Line(line))
    }

    /// Ask the device to stop; the stream keeps running until `OK STP`
    pub async fn request_stop(&mut self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Streaming => {
                self.session.transport.write_line(CMD_STOP).await?;
                self.session.state = SessionState::Stopping;
                Ok(())
            }
            SessionState::Stopping => Ok(()),
            other => Err(SessionError::InvalidState(other)),
        }
    }

    /// Stop the device and wait for the acknowledgement
    ///
    /// `STP` is written even when a stop was already requested, since that
    /// earlier attempt may have gone unanswered. Telemetry still in flight
    /// is discarded.
    pub async fn stop(mut self) -> Result<(), SessionError> {
        let response = match self.state() {
            SessionState::Streaming | SessionState::Stopping => {
                self.session.state = SessionState::Stopping;
                self.session.exchange(CMD_STOP).await?
            }
            SessionState::Idle => return Ok(()),
            other => return Err(SessionError::InvalidState(other)),
        };

        if response != Response::Acknowledged {
            warn!("Stop handshake failed: {:?}", response);
        }
        response.into_result(CMD_STOP)?;
        self.session.state = SessionState::Idle;
        info!("Device stopped streaming");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::scripted::{line, Incoming, ScriptedTransport};

    fn controller(transport: ScriptedTransport) -> SessionController<ScriptedTransport> {
        SessionController::new(transport, Duration::ZERO)
    }

    #[test]
    fn classifies_answers_by_prefix() {
        assert_eq!(classify("OK STA"), Some(Response::Acknowledged));
        assert_eq!(classify("OK"), Some(Response::Acknowledged));
        assert_eq!(
            classify("NG 03"),
            Some(Response::Rejected("NG 03".to_string()))
        );
        assert_eq!(classify("CO2=400,HUM=50.0,TMP=20.0"), None);
        assert_eq!(classify("O"), None);
    }

    #[tokio::test]
    async fn handshake_reaches_streaming() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")]);
        let written = transport.written();
        let mut session = controller(transport);

        let handle = session.start().await.unwrap();
        assert_eq!(handle.state(), SessionState::Streaming);
        assert_eq!(*written.lock().unwrap(), vec!["STP", "STA"]);
    }

    #[tokio::test]
    async fn rejected_start_stops_the_sequence() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("NG")]);
        let written = transport.written();
        let mut session = controller(transport);

        let err = session.start().await.err().unwrap();
        assert!(matches!(err, SessionError::Rejected { ref command, .. } if command == "STA"));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(*written.lock().unwrap(), vec!["STP", "STA"]);
    }

    #[tokio::test]
    async fn rejected_stop_skips_start_command() {
        let transport = ScriptedTransport::new().reply("STP", vec![line("NG busy")]);
        let written = transport.written();
        let mut session = controller(transport);

        assert!(matches!(
            session.start().await.err().unwrap(),
            SessionError::Rejected { ref reason, .. } if reason == "NG busy"
        ));
        assert_eq!(*written.lock().unwrap(), vec!["STP"]);
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let transport = ScriptedTransport::new().reply("STP", vec![line("OK STP")]);
        let mut session = controller(transport);

        assert!(matches!(
            session.start().await.err().unwrap(),
            SessionError::TimedOut { ref command } if command == "STA"
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn stale_stream_lines_are_discarded_during_handshake() {
        let transport = ScriptedTransport::new()
            .pending(vec![line("CO2=999,HUM=10.0,TMP=10.0")])
            .reply(
                "STP",
                vec![line("CO2=998,HUM=10.0,TMP=10.0"), line("OK STP")],
            )
            .reply("STA", vec![line("OK STA")]);
        let mut session = controller(transport);

        let mut handle = session.start().await.unwrap();
        assert_eq!(handle.next_event().await.unwrap(), StreamEvent::Quiet);
    }

    #[tokio::test]
    async fn closed_link_during_handshake_is_a_transport_error() {
        let transport = ScriptedTransport::new().close_when_drained();
        let mut session = controller(transport);

        assert!(matches!(
            session.start().await.err().unwrap(),
            SessionError::Transport(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn start_requires_idle_session() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")]);
        let mut session = controller(transport);
        session.start().await.unwrap();

        assert!(matches!(
            session.start().await.err().unwrap(),
            SessionError::InvalidState(SessionState::Streaming)
        ));
    }

    #[tokio::test]
    async fn stream_sorts_lines_and_ends_on_ok_stp() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply(
                "STA",
                vec![
                    line("OK STA"),
                    line("CO2=400,HUM=50.0,TMP=20.0"),
                    Incoming::Timeout,
                    line("OK STP"),
                ],
            );
        let mut session = controller(transport);
        let mut handle = session.start().await.unwrap();

        assert_eq!(
            handle.next_event().await.unwrap(),
            StreamEvent::Line("CO2=400,HUM=50.0,TMP=20.0".to_string())
        );
        assert_eq!(handle.next_event().await.unwrap(), StreamEvent::Quiet);
        assert_eq!(handle.next_event().await.unwrap(), StreamEvent::Stopped);
        assert_eq!(handle.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn requested_stop_moves_through_stopping() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")])
            .reply("STP", vec![line("CO2=410,HUM=50.0,TMP=20.0"), line("OK STP")]);
        let written = transport.written();
        let mut session = controller(transport);
        let mut handle = session.start().await.unwrap();

        handle.request_stop().await.unwrap();
        assert_eq!(handle.state(), SessionState::Stopping);
        assert!(matches!(
            handle.next_event().await.unwrap(),
            StreamEvent::Line(_)
        ));
        assert_eq!(handle.next_event().await.unwrap(), StreamEvent::Stopped);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(*written.lock().unwrap(), vec!["STP", "STA", "STP"]);
    }

    #[tokio::test]
    async fn quiet_link_while_stopping_fails_the_stop() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")]);
        let mut session = controller(transport);
        let mut handle = session.start().await.unwrap();

        handle.request_stop().await.unwrap();
        assert!(matches!(
            handle.next_event().await.err().unwrap(),
            SessionError::TimedOut { .. }
        ));
    }

    #[tokio::test]
    async fn rejection_while_stopping_fails_the_stop() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")])
            .reply("STP", vec![line("CO2=410,HUM=50.0,TMP=20.0"), line("NG 02")]);
        let mut session = controller(transport);
        let mut handle = session.start().await.unwrap();

        handle.request_stop().await.unwrap();
        assert!(matches!(
            handle.next_event().await.unwrap(),
            StreamEvent::Line(_)
        ));
        assert!(matches!(
            handle.next_event().await.err().unwrap(),
            SessionError::Rejected { ref command, ref reason }
                if command == "STP" && reason == "NG 02"
        ));
        assert_eq!(handle.state(), SessionState::Stopping);
    }

    #[tokio::test]
    async fn explicit_stop_after_failed_request_writes_stp_again() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")])
            .reply("STP", vec![])
            .reply("STP", vec![line("OK STP")]);
        let written = transport.written();
        let mut session = controller(transport);
        let mut handle = session.start().await.unwrap();

        handle.request_stop().await.unwrap();
        assert!(matches!(
            handle.next_event().await.err().unwrap(),
            SessionError::TimedOut { .. }
        ));

        handle.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(*written.lock().unwrap(), vec!["STP", "STA", "STP", "STP"]);
    }

    #[tokio::test]
    async fn explicit_stop_waits_for_acknowledgement() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")])
            .reply("STP", vec![line("CO2=410,HUM=50.0,TMP=20.0"), line("OK STP")]);
        let mut session = controller(transport);
        let handle = session.start().await.unwrap();

        handle.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn explicit_stop_surfaces_rejection() {
        let transport = ScriptedTransport::new()
            .reply("STP", vec![line("OK STP")])
            .reply("STA", vec![line("OK STA")])
            .reply("STP", vec![line("NG")]);
        let mut session = controller(transport);
        let handle = session.start().await.unwrap();

        assert!(matches!(
            handle.stop().await.err().unwrap(),
            SessionError::Rejected { .. }
        ));
        assert_eq!(session.state(), SessionState::Stopping);
    }
}
