// socketcan-replay/src/responder.rs
//
// Implements the J1939 Transport Protocol responder.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The responder side of a J1939 Transport Protocol session.
//!
//! The responder plays back a recorded multi-packet transfer whenever a
//! node on the bus asks for it:
//!
//! ```text
//!           +-----------+  request (PF EA) with a matching RTS
//!   +-----> | Listening | ----------------------------------+
//!   |       +-----------+                       send RTS    |
//!   |             ^                                         v
//!   |             |  CTS timeout               +-------------+
//!   |             +--------------------------- | AwaitingCts |
//!   |                                          +-------------+
//!   |   all DT packets sent                         |  CTS (PF EC, 0x11)
//!   |       +-----------+                           |
//!   +------ | Streaming | <-------------------------+
//!           +-----------+
//! ```
//!
//! Only one session is handled at a time. Requests that arrive while a
//! session is in progress are not queued.

use crate::{
    catalog::Segment,
    id::{PF_REQUEST, PF_TP_CM, PF_TP_DT, TP_CM_CTS},
    Bus, CanFrame, J1939Id, SendError, Shutdown, ShouldRetry, TransportCatalog,
};
use log::{debug, error, info, trace, warn};
use std::{
    fmt,
    io::{self, ErrorKind},
    sync::Arc,
    time::{Duration, Instant},
};

/// The default time to wait for a CTS after sending the RTS.
///
/// This is the J1939-21 T3 timeout.
pub const DEFAULT_CTS_TIMEOUT: Duration = Duration::from_millis(1250);

/// The default delay between two data transfer packets.
pub const DEFAULT_PACKET_DELAY: Duration = Duration::from_millis(100);

/// The default receive tick, which bounds how long it takes to notice a
/// shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timing parameters for the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponderConfig {
    /// How long to wait for the CTS. `None` waits forever.
    pub cts_timeout: Option<Duration>,
    /// The pause between two DT packets.
    pub packet_delay: Duration,
    /// The receive tick.
    pub poll_interval: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            cts_timeout: Some(DEFAULT_CTS_TIMEOUT),
            packet_delay: DEFAULT_PACKET_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ResponderConfig {
    /// Sets the CTS timeout, or `None` to wait forever.
    pub fn cts_timeout<D: Into<Option<Duration>>>(mut self, timeout: D) -> Self {
        self.cts_timeout = timeout.into();
        self
    }

    /// Sets the delay between DT packets.
    pub fn packet_delay(mut self, delay: Duration) -> Self {
        self.packet_delay = delay;
        self
    }

    /// Sets the receive tick.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// An active transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// The requester's address (SA of the request)
    pub source: u8,
    /// The address the request was sent to (DA of the request)
    pub destination: u8,
    /// The RTS frame that opened the session
    pub rts: CanFrame,
}

impl Session {
    /// The ID used by the data transfer packets of this session.
    ///
    /// It is the RTS ID with only the PDU Format changed.
    pub fn dt_id(&self) -> J1939Id {
        self.rts.j1939_id().with_pf(PF_TP_DT)
    }

    /// Whether the frame is the CTS that lets this session proceed.
    pub fn is_cts(&self, frame: &CanFrame) -> bool {
        frame.j1939_id().matches(PF_TP_CM, self.destination, self.source)
            && frame.data().first() == Some(&TP_CM_CTS)
    }
}

/// The state of the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for a request.
    Listening,
    /// The RTS was sent, waiting for the requester's CTS.
    AwaitingCts {
        /// The session being set up
        session: Session,
        /// When to give up, if ever
        deadline: Option<Instant>,
    },
    /// The CTS arrived, the DT packets are due.
    Streaming(Session),
}

/// The outcome of streaming one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamReport {
    /// The number of packets written
    pub sent: usize,
    /// The number of packets that failed to be written
    pub failed: usize,
    /// Whether the stream was cut short by a shutdown
    pub aborted: bool,
}

/// The Transport Protocol responder.
pub struct Responder<B: ?Sized> {
    bus: Arc<B>,
    catalog: Arc<TransportCatalog>,
    config: ResponderConfig,
    shutdown: Shutdown,
}

impl<B> Responder<B>
where
    B: Bus + ?Sized,
{
    /// Creates a responder that replies from the catalog over the bus.
    pub fn new(
        bus: Arc<B>,
        catalog: Arc<TransportCatalog>,
        config: ResponderConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            bus,
            catalog,
            config,
            shutdown,
        }
    }

    /// Gets the timing configuration.
    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    /// Advances the state machine with a received frame.
    ///
    /// This sends the RTS when a request opens a session. It never streams:
    /// a `Streaming` state is returned for the caller to act on with
    /// [`Responder::stream`].
    pub fn handle_frame(&self, state: State, frame: &CanFrame) -> State {
        match state {
            State::Listening => self.handle_request(frame),
            State::AwaitingCts { session, deadline } => {
                if session.is_cts(frame) {
                    info!("CTS from {:02X}, streaming {}", session.source, session.dt_id());
                    State::Streaming(session)
                } else {
                    trace!("Waiting for CTS, ignoring {}", frame);
                    State::AwaitingCts { session, deadline }
                }
            }
            // The caller streams before receiving again
            State::Streaming(session) => State::Streaming(session),
        }
    }

    // A frame received while listening.
    fn handle_request(&self, frame: &CanFrame) -> State {
        let id = frame.j1939_id();
        if id.pf() != PF_REQUEST {
            return State::Listening;
        }

        let (source, destination) = (id.sa(), id.da());
        let rts = match self.catalog.find_rts(source, destination) {
            Some(rts) => *rts,
            None => {
                debug!(
                    "No session recorded for request {} ({:02X} -> {:02X})",
                    frame, source, destination
                );
                return State::Listening;
            }
        };

        info!(
            "Request from {:02X} to {:02X}, sending RTS {}",
            source, destination, rts
        );

        if let Err(err) = self.bus.send(&rts) {
            warn!("Error sending RTS {}: {}", rts.j1939_id(), err);
            return State::Listening;
        }

        let deadline = self
            .config
            .cts_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));

        State::AwaitingCts {
            session: Session {
                source,
                destination,
                rts,
            },
            deadline,
        }
    }

    /// Checks the CTS deadline of a state.
    ///
    /// A session whose CTS never arrived in time is dropped, returning the
    /// responder to `Listening`.
    pub fn check_timeout(&self, state: State, now: Instant) -> State {
        match state {
            State::AwaitingCts {
                session,
                deadline: Some(deadline),
            } if now >= deadline => {
                warn!(
                    "No CTS from {:02X} for RTS {}, dropping the session",
                    session.source,
                    session.rts.j1939_id()
                );
                State::Listening
            }
            state => state,
        }
    }

    /// Sends the recorded DT packets of a session, in sequence order.
    ///
    /// A packet that fails to send is reported and skipped. There is a
    /// pause of the configured packet delay between packets. A shutdown
    /// cuts the stream short.
    pub fn stream(&self, session: &Session) -> StreamReport {
        let dt_id = session.dt_id();
        let segments: Vec<Segment<'_>> = self
            .catalog
            .find_segments(session.source, session.destination);

        let mut report = StreamReport::default();

        if segments.is_empty() {
            warn!("No DT packets recorded for {}", dt_id);
            return report;
        }

        for (i, seg) in segments.iter().enumerate() {
            if i > 0 && self.shutdown.wait_timeout(self.config.packet_delay) {
                info!("Shutdown in the middle of streaming {}", dt_id);
                report.aborted = true;
                break;
            }

            let res = CanFrame::new(dt_id, seg.payload)
                .map_err(|err| SendError::Io(io::Error::new(ErrorKind::InvalidData, err)))
                .and_then(|frame| self.bus.send(&frame));

            match res {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    warn!("Error sending {} packet #{}: {}", dt_id, seg.sequence, err);
                    report.failed += 1;
                }
            }
        }

        if !report.aborted {
            info!(
                "Streamed {} of {} packet(s) on {}",
                report.sent,
                segments.len(),
                dt_id
            );
        }
        report
    }

    /// Runs the responder until shutdown.
    pub fn run(&self) {
        let mut state = State::Listening;
        info!(
            "Responder listening, {} session(s) recorded",
            self.catalog.num_sessions()
        );

        while !self.shutdown.is_triggered() {
            if let State::Streaming(session) = state {
                self.stream(&session);
                state = State::Listening;
                continue;
            }

            match self.bus.receive_timeout(self.config.poll_interval) {
                Ok(frame) => {
                    trace!("Received {}", frame);
                    state = self.handle_frame(state, &frame);
                }
                Err(err) if err.should_retry() => (),
                Err(err) if err.kind() == ErrorKind::NotConnected => {
                    error!("The bus was closed: {}", err);
                    break;
                }
                Err(err) => {
                    error!("Error receiving: {}", err);
                    // Don't spin on a persistent error
                    self.shutdown.wait_timeout(self.config.poll_interval);
                }
            }

            state = self.check_timeout(state, Instant::now());
        }
        debug!("Responder stopped");
    }
}

impl<B: ?Sized> fmt::Debug for Responder<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Responder")
            .field("config", &self.config)
            .field("num_sessions", &self.catalog.num_sessions())
            .finish()
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockBus;
    use std::thread;

    const CATALOG: &str = r#"{
        "1CEC1020": ["1012000300FFCAFE", "10FFFFFFFFFFFFFF"],
        "1CEB1020": ["0222222222222222", "0111111111111111", "0333333333333333"],
        "1CEC3040": ["1009000200FFBEEF"],
        "1CEB3040": ["0144444444444444", "0255555555555555"]
    }"#;

    const REQUEST: u32 = 0x18EA2010;
    const CTS: u32 = 0x1CEC2010;

    fn frame(id: u32, data: &[u8]) -> CanFrame {
        CanFrame::from_raw_id(id, data).unwrap()
    }

    fn request() -> CanFrame {
        frame(REQUEST, &[0x00, 0xEE, 0x00])
    }

    fn cts() -> CanFrame {
        frame(CTS, &[TP_CM_CTS, 0x03, 0x01, 0xFF, 0xFF, 0x00, 0xEE, 0x00])
    }

    fn config() -> ResponderConfig {
        ResponderConfig::default()
            .packet_delay(Duration::from_millis(20))
            .poll_interval(Duration::from_millis(10))
    }

    fn responder(bus: &Arc<MockBus>, config: ResponderConfig) -> Responder<MockBus> {
        let catalog = Arc::new(TransportCatalog::from_json_str(CATALOG).unwrap());
        Responder::new(Arc::clone(bus), catalog, config, Shutdown::new())
    }

    fn awaiting(resp: &Responder<MockBus>) -> State {
        resp.handle_frame(State::Listening, &request())
    }

    #[test]
    fn test_default_config() {
        let cfg = ResponderConfig::default();
        assert_eq!(cfg.cts_timeout, Some(Duration::from_millis(1250)));
        assert_eq!(cfg.packet_delay, Duration::from_millis(100));
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));

        assert_eq!(cfg.cts_timeout(None).cts_timeout, None);
    }

    #[test]
    fn test_listening_ignores_other_pgns() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());

        for id in [0x18FEF110, 0x1CEC2010, 0x1CEB2010, 0x0CF00400] {
            let state = resp.handle_frame(State::Listening, &frame(id, &[0x11; 8]));
            assert_eq!(state, State::Listening);
        }
        assert!(bus.sent_frames().is_empty());
    }

    #[test]
    fn test_unmatched_request() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());

        // Right PGN, but nothing recorded for 0x10 -> 0x21
        let state = resp.handle_frame(State::Listening, &frame(0x18EA2110, &[0x00, 0xEE, 0x00]));
        assert_eq!(state, State::Listening);
        assert!(bus.sent_frames().is_empty());
    }

    #[test]
    fn test_request_sends_rts() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());

        let state = awaiting(&resp);

        let sent = bus.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_string(), "1CEC1020#1012000300FFCAFE");

        match state {
            State::AwaitingCts { session, deadline } => {
                assert_eq!(session.source, 0x10);
                assert_eq!(session.destination, 0x20);
                assert_eq!(session.rts, sent[0]);
                assert!(deadline.is_some());
            }
            _ => panic!("Expected AwaitingCts, got {:?}", state),
        }
    }

    #[test]
    fn test_request_priority_is_irrelevant() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());

        let state = resp.handle_frame(State::Listening, &frame(0x0CEA2010, &[0x00, 0xEE, 0x00]));
        assert!(matches!(state, State::AwaitingCts { .. }));
    }

    #[test]
    fn test_rts_send_failure() {
        let bus = Arc::new(MockBus::new());
        bus.fail_when(|f| f.j1939_id().pf() == PF_TP_CM);
        let resp = responder(&bus, config());

        assert_eq!(awaiting(&resp), State::Listening);
        assert_eq!(bus.num_failed(), 1);
    }

    #[test]
    fn test_only_cts_starts_stream() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());
        let mut state = awaiting(&resp);

        let not_cts = [
            // RTS control byte
            frame(CTS, &[0x10, 0x03]),
            // wrong addresses
            frame(0x1CEC2011, &[TP_CM_CTS]),
            frame(0x1CEC2110, &[TP_CM_CTS]),
            frame(0x1CEC1020, &[TP_CM_CTS]),
            // wrong PGN
            frame(0x1CEB2010, &[TP_CM_CTS]),
            // another request
            request(),
            // no data
            frame(CTS, &[]),
        ];

        for f in &not_cts {
            state = resp.handle_frame(state, f);
            assert!(matches!(state, State::AwaitingCts { .. }), "{}", f);
        }

        state = resp.handle_frame(state, &cts());
        match state {
            State::Streaming(session) => {
                assert_eq!(session.source, 0x10);
                assert_eq!(session.dt_id().as_raw(), 0x1CEB1020);
            }
            _ => panic!("Expected Streaming, got {:?}", state),
        }

        // Only the RTS went out
        assert_eq!(bus.sent_frames().len(), 1);
    }

    #[test]
    fn test_cts_any_priority() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());

        let state = resp.handle_frame(awaiting(&resp), &frame(0x18EC2010, &[TP_CM_CTS]));
        assert!(matches!(state, State::Streaming(_)));
    }

    #[test]
    fn test_stream_in_sequence_order() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());

        let session = match resp.handle_frame(awaiting(&resp), &cts()) {
            State::Streaming(session) => session,
            state => panic!("Expected Streaming, got {:?}", state),
        };

        let report = resp.stream(&session);
        assert_eq!(
            report,
            StreamReport {
                sent: 3,
                failed: 0,
                aborted: false
            }
        );

        let sent = bus.sent();
        let dt: Vec<_> = sent.iter().skip(1).collect();
        assert_eq!(dt.len(), 3);

        for (i, (_, f)) in dt.iter().enumerate() {
            assert_eq!(f.raw_id(), 0x1CEB1020);
            assert_eq!(f.data()[0], i as u8 + 1);
        }

        for w in dt.windows(2) {
            assert!(w[1].0 - w[0].0 >= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_stream_continues_after_failure() {
        let bus = Arc::new(MockBus::new());
        bus.fail_when(|f| f.j1939_id().pf() == PF_TP_DT && f.data()[0] == 2);
        let resp = responder(&bus, config());

        let session = match resp.handle_frame(awaiting(&resp), &cts()) {
            State::Streaming(session) => session,
            state => panic!("Expected Streaming, got {:?}", state),
        };

        let report = resp.stream(&session);
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);

        let seqs: Vec<u8> = bus
            .sent_frames()
            .iter()
            .filter(|f| f.j1939_id().pf() == PF_TP_DT)
            .map(|f| f.data()[0])
            .collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn test_stream_aborts_on_shutdown() {
        let bus = Arc::new(MockBus::new());
        let catalog = Arc::new(TransportCatalog::from_json_str(CATALOG).unwrap());
        let shutdown = Shutdown::new();
        let resp = Responder::new(
            Arc::clone(&bus),
            catalog,
            config().packet_delay(Duration::from_secs(30)),
            shutdown.clone(),
        );

        let session = match resp.handle_frame(awaiting(&resp), &cts()) {
            State::Streaming(session) => session,
            state => panic!("Expected Streaming, got {:?}", state),
        };

        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            shutdown.trigger();
        });

        let start = Instant::now();
        let report = resp.stream(&session);
        trigger.join().unwrap();

        assert!(report.aborted);
        assert_eq!(report.sent, 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cts_timeout() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config().cts_timeout(Duration::from_millis(500)));

        let state = awaiting(&resp);
        let now = Instant::now();

        let state = resp.check_timeout(state, now);
        assert!(matches!(state, State::AwaitingCts { .. }));

        let state = resp.check_timeout(state, now + Duration::from_secs(1));
        assert_eq!(state, State::Listening);
    }

    #[test]
    fn test_no_cts_timeout() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config().cts_timeout(None));

        let state = awaiting(&resp);
        let state = resp.check_timeout(state, Instant::now() + Duration::from_secs(3600));
        assert!(matches!(state, State::AwaitingCts { deadline: None, .. }));
    }

    #[test]
    fn test_run_full_session() {
        let bus = Arc::new(MockBus::new());
        let catalog = Arc::new(TransportCatalog::from_json_str(CATALOG).unwrap());
        let shutdown = Shutdown::new();
        let resp = Responder::new(Arc::clone(&bus), catalog, config(), shutdown.clone());

        let handle = thread::spawn(move || resp.run());

        bus.push_rx(frame(0x18FEF110, &[0; 8]));
        bus.push_rx(request());
        assert!(bus.wait_sent(1, Duration::from_secs(5)));
        bus.push_rx(cts());
        assert!(bus.wait_sent(4, Duration::from_secs(5)));

        // Back to listening: a second, unrelated, session
        bus.push_rx(frame(0x18EA4030, &[0x00, 0xEE, 0x00]));
        assert!(bus.wait_sent(5, Duration::from_secs(5)));
        bus.push_rx(frame(0x1CEC4030, &[TP_CM_CTS, 0x02, 0x01]));
        assert!(bus.wait_sent(7, Duration::from_secs(5)));

        shutdown.trigger();
        handle.join().unwrap();

        let sent: Vec<String> = bus.sent_frames().iter().map(|f| f.to_string()).collect();
        assert_eq!(
            sent,
            vec![
                "1CEC1020#1012000300FFCAFE",
                "1CEB1020#0111111111111111",
                "1CEB1020#0222222222222222",
                "1CEB1020#0333333333333333",
                "1CEC3040#1009000200FFBEEF",
                "1CEB3040#0144444444444444",
                "1CEB3040#0255555555555555",
            ]
        );
    }

    #[test]
    fn test_run_times_out_and_recovers() {
        let bus = Arc::new(MockBus::new());
        let catalog = Arc::new(TransportCatalog::from_json_str(CATALOG).unwrap());
        let shutdown = Shutdown::new();
        let resp = Responder::new(
            Arc::clone(&bus),
            catalog,
            config().cts_timeout(Duration::from_millis(50)),
            shutdown.clone(),
        );

        let handle = thread::spawn(move || resp.run());

        bus.push_rx(request());
        assert!(bus.wait_sent(1, Duration::from_secs(5)));

        // Let the CTS wait expire, then a late CTS must not start a stream
        thread::sleep(Duration::from_millis(200));
        bus.push_rx(cts());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(bus.sent_frames().len(), 1);

        // But a new request is served
        bus.push_rx(request());
        assert!(bus.wait_sent(2, Duration::from_secs(5)));

        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn test_run_stops_on_closed_bus() {
        let bus = Arc::new(MockBus::new());
        let resp = responder(&bus, config());
        bus.close().unwrap();

        // Returns without a shutdown signal
        resp.run();
    }
}
