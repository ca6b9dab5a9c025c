//! Integration tests for the AT instance state machine.
//!
//! Every test drives a registry over the scripted [`MockModem`], which replies
//! from inside `send` unless a reply delay is configured.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use atlink_engine::{
    at_expect_ok, at_send, at_send_and_log, at_send_binary, AtError, AtRegistry, ChannelHandle,
    EngineConfig, Instance, MockModem, OverflowPolicy, RxNotify, Transport, TransportError,
};
use parking_lot::Mutex;

const SHORT: Duration = Duration::from_millis(150);
const LONG: Duration = Duration::from_secs(2);

fn setup(config: EngineConfig) -> (MockModem, AtRegistry) {
    let modem = MockModem::new();
    modem.reply("ATI", "Telit\r\n\r\nOK\r\n");
    modem.reply("AT+CSQ", "+CSQ: 15,99\r\n\r\nOK\r\n");
    let registry = AtRegistry::new(config, Arc::new(modem.clone()));
    (modem, registry)
}

fn open(at: &Instance) {
    assert!(at.send_command_expect_ok(LONG, "ATI"));
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |line: &str| sink.lock().push(line.to_string()))
}

/// Collects formatted log output.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with debug logging captured into the returned buffer.
fn with_debug_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, capture)
}

/// A modem that prints a banner the moment its port opens, before the
/// engine knows the new channel handle.
struct BannerModem {
    inner: MockModem,
}

impl Transport for BannerModem {
    fn open(&self, instance: u8, on_rx: RxNotify) -> Result<ChannelHandle, TransportError> {
        let handle = self.inner.open(instance, on_rx)?;
        assert!(self.inner.inject(instance, "\r\nRDY\r\n"));
        Ok(handle)
    }

    fn send(&self, handle: ChannelHandle, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.send(handle, bytes)
    }

    fn receive(&self, handle: ChannelHandle, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.inner.receive(handle, buf)
    }

    fn close(&self, handle: ChannelHandle) {
        self.inner.close(handle)
    }
}

// ============================================================================
// Responses
// ============================================================================

#[test]
fn test_expect_ok_and_raw_response() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();

    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
    assert_eq!(at.send_command(LONG, "AT+CSQ").unwrap(), "+CSQ: 15,99\r\n\r\nOK\r\n");
    assert_eq!(at.last_response().unwrap().as_ref(), b"+CSQ: 15,99\r\n\r\nOK\r\n");

    // Opened lazily, echo disabled first.
    assert_eq!(modem.sent_on(0), vec!["ATE0", "AT+CSQ", "AT+CSQ"]);
    assert!(at.is_open());
}

#[test]
fn test_error_response_is_not_ok() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply("AT+CPIN?", "+CME ERROR: 10\r\n");
    let at = registry.instance(0).unwrap();

    assert!(!at.send_command_expect_ok(LONG, "AT+CPIN?"));
    assert_eq!(at.last_response().unwrap().as_ref(), b"+CME ERROR: 10\r\n");
}

#[test]
fn test_binary_response_is_returned_unmodified() {
    let (modem, registry) = setup(EngineConfig::default());
    let payload = b"\x00\x01\xfe\xff\r\nOK\r\n".to_vec();
    modem.reply("AT#FREAD", &payload);
    let at = registry.instance(0).unwrap();

    let rsp = at.send_command_binary(LONG, "AT#FREAD").unwrap();
    assert_eq!(rsp.as_ref(), payload.as_slice());
}

#[test]
fn test_prompt_terminates_response() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply("AT#SSEND=1", "\r\n> ");
    let at = registry.instance(0).unwrap();

    assert_eq!(at.send_command(LONG, "AT#SSEND=1").unwrap(), "> ");
}

#[test]
fn test_chunking_does_not_change_response() {
    let (modem, registry) = setup(EngineConfig::default());
    let rsp = b"+COPS: 0,0,\"I TIM\",7\r\n\r\nOK\r\n";
    modem.reply_chunks("AT+COPS?", vec![rsp.to_vec()]);
    modem.reply_chunks("AT+COPS=?", rsp.iter().map(|b| vec![*b]).collect());
    let at = registry.instance(0).unwrap();

    let whole = at.send_command_binary(LONG, "AT+COPS?").unwrap();
    let bytewise = at.send_command_binary(LONG, "AT+COPS=?").unwrap();
    assert_eq!(whole.as_ref(), rsp);
    assert_eq!(bytewise, whole);
    assert_eq!(at.stats().discarded_bytes, 0);
}

#[test]
fn test_bytes_after_final_result_are_discarded() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply("AT+CGSN", "356938035643809\r\n\r\nOK\r\nJUNK");
    let at = registry.instance(0).unwrap();

    assert_eq!(at.send_command(LONG, "AT+CGSN").unwrap(), "356938035643809\r\n\r\nOK\r\n");
    assert_eq!(at.stats().discarded_bytes, 4);
}

#[test]
fn test_macros_format_commands() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply("AT#GPIO=", "OK\r\n");
    let at = registry.instance(0).unwrap();

    let pin = 4;
    assert!(at_expect_ok!(at, LONG, "AT#GPIO={},{},{}", pin, 1, 1));
    assert_eq!(at_send!(at, LONG, "AT#GPIO={},0", pin).unwrap(), "OK\r\n");
    assert_eq!(at_send_and_log!(at, LONG, "AT#GPIO={}", 7).unwrap(), "OK\r\n");
    assert_eq!(
        at_send_binary!(at, LONG, "AT+CSQ").unwrap().as_ref(),
        b"+CSQ: 15,99\r\n\r\nOK\r\n"
    );
    assert_eq!(
        modem.sent_on(0),
        vec!["ATE0", "AT#GPIO=4,1,1", "AT#GPIO=4,0", "AT#GPIO=7", "AT+CSQ"]
    );
}

#[test]
fn test_quiet_policy_does_not_change_results() {
    let (_modem, registry) = setup(EngineConfig::default());
    registry.disable_logs_for_prefix("AT+CSQ").unwrap();
    let at = registry.instance(0).unwrap();
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));

    registry.disable_all_logs();
    assert!(at.send_command_expect_ok(LONG, "ATI"));
    assert!(at.send_command_and_log(LONG, "AT+CSQ").unwrap().ends_with("OK\r\n"));
}

// ============================================================================
// URCs
// ============================================================================

#[test]
fn test_idle_urc_is_delivered_and_remainder_discarded() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    let (seen, cb) = recorder();
    at.add_urc_handler("+CREG:", cb).unwrap();
    open(&at);

    assert!(modem.inject(0, "+CREG: 1\r\nOK\r\n"));
    assert_eq!(*seen.lock(), vec!["+CREG: 1"]);

    let stats = at.stats();
    assert_eq!(stats.urcs_dispatched, 1);
    assert_eq!(stats.discarded_bytes, 4);
}

#[test]
fn test_urc_interleaved_with_response_is_stripped() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply_chunks(
        "AT+COPS?",
        vec![
            b"+COPS: 0\r\n".to_vec(),
            b"+CREG: 5\r\n".to_vec(),
            b"OK\r\n".to_vec(),
        ],
    );
    let at = registry.instance(0).unwrap();
    let (seen, cb) = recorder();
    at.add_urc_handler("+CREG:", cb).unwrap();

    assert_eq!(at.send_command(LONG, "AT+COPS?").unwrap(), "+COPS: 0\r\nOK\r\n");
    assert_eq!(*seen.lock(), vec!["+CREG: 5"]);
}

#[test]
fn test_urc_split_across_response_chunks() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply_chunks(
        "AT+COPS?",
        vec![b"+COPS: 0\r\n+CREG: ".to_vec(), b"5\r\nOK\r\n".to_vec()],
    );
    let at = registry.instance(0).unwrap();
    let (seen, cb) = recorder();
    at.add_urc_handler("+CREG:", cb).unwrap();

    assert_eq!(at.send_command(LONG, "AT+COPS?").unwrap(), "+COPS: 0\r\nOK\r\n");
    assert_eq!(*seen.lock(), vec!["+CREG: 5"]);
}

#[test]
fn test_idle_urc_split_across_chunks_is_delivered_once() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply("AT+CEREG?", "2\r\n+CEREG: 0,1\r\n\r\nOK\r\n");
    let at = registry.instance(0).unwrap();
    let (seen, cb) = recorder();
    at.add_urc_handler("+CREG:", cb).unwrap();
    open(&at);

    modem.inject(0, "\r\n+CR");
    modem.inject(0, "EG: 1\r");
    assert!(seen.lock().is_empty());
    modem.inject(0, "\n");
    assert_eq!(*seen.lock(), vec!["+CREG: 1"]);
    assert_eq!(at.stats().discarded_bytes, 0);

    // A fragment still pending when the next command goes out is completed
    // by the first bytes of its reply.
    modem.inject(0, "+CREG: ");
    assert_eq!(at.send_command(LONG, "AT+CEREG?").unwrap(), "+CEREG: 0,1\r\n\r\nOK\r\n");
    assert_eq!(*seen.lock(), vec!["+CREG: 1", "+CREG: 2"]);
}

#[test]
fn test_handlers_fire_regardless_of_line_order() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    let (seen_a, cb_a) = recorder();
    let (seen_b, cb_b) = recorder();
    at.add_urc_handler("+A:", cb_a).unwrap();
    at.add_urc_handler("+B:", cb_b).unwrap();
    open(&at);

    modem.inject(0, "+B: 2\r\n+A: 1\r\n");
    assert_eq!(*seen_a.lock(), vec!["+A: 1"]);
    assert_eq!(*seen_b.lock(), vec!["+B: 2"]);
    assert_eq!(at.stats().discarded_bytes, 0);
}

#[test]
fn test_handler_replacement_and_table_limit() {
    let config = EngineConfig {
        max_urc_handlers: 1,
        ..EngineConfig::default()
    };
    let (modem, registry) = setup(config);
    let at = registry.instance(0).unwrap();
    let (old, cb_old) = recorder();
    let (new, cb_new) = recorder();

    at.add_urc_handler("#RING", cb_old).unwrap();
    at.add_urc_handler("#RING", cb_new).unwrap();
    assert!(matches!(
        at.add_urc_handler("+CREG:", |_| {}),
        Err(AtError::Protocol(_))
    ));

    open(&at);
    modem.inject(0, "#RING\r\n");
    assert!(old.lock().is_empty());
    assert_eq!(*new.lock(), vec!["#RING"]);
}

#[test]
fn test_reentrant_use_from_callback_is_rejected() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    let weak = Arc::downgrade(&at);
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);

    at.add_urc_handler("#SRING:", move |_| {
        if let Some(at) = weak.upgrade() {
            let send = at.send_command(SHORT, "AT#SRECV=1,100");
            let add = at.add_urc_handler("+X:", |_| {});
            let close = at.close();
            sink.lock().push((send.is_err(), add.is_err(), close.is_err()));
            assert!(matches!(send, Err(AtError::Reentrant { instance: 0 })));
        }
    })
    .unwrap();
    open(&at);

    modem.inject(0, "#SRING: 1\r\n");
    assert_eq!(*results.lock(), vec![(true, true, true)]);

    // The instance is still usable afterwards.
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_timeout_then_next_command_succeeds() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    open(&at);

    let start = Instant::now();
    assert!(matches!(at.send_command(SHORT, "AT+SILENT"), Err(AtError::Timeout)));
    assert!(start.elapsed() >= SHORT);

    // A late reply has no owner and is dropped.
    modem.inject(0, "LATE\r\nOK\r\n");
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
    assert_eq!(at.send_command(LONG, "AT+CSQ").unwrap(), "+CSQ: 15,99\r\n\r\nOK\r\n");

    let stats = at.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.discarded_bytes, 10);
}

#[test]
fn test_expect_ok_is_false_on_timeout() {
    let (_modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    assert!(!at.send_command_expect_ok(SHORT, "AT+SILENT"));
}

#[test]
fn test_expect_ok_timeout_is_still_logged_when_all_logs_disabled() {
    let (_modem, registry) = setup(EngineConfig::default());
    registry.disable_all_logs();
    let at = registry.instance(0).unwrap();
    open(&at);

    let (ok, logs) = with_debug_logs(|| at.send_command_expect_ok(SHORT, "AT+SILENT"));
    assert!(!ok);
    assert!(logs.text().contains("Command 'AT+SILENT' got no response"));
    assert_eq!(at.stats().timeouts, 1);
}

#[test]
fn test_banner_before_open_is_drained() {
    let modem = MockModem::new();
    modem.reply("AT+CSQ", "+CSQ: 15,99\r\n\r\nOK\r\n");
    let registry = AtRegistry::new(
        EngineConfig::default(),
        Arc::new(BannerModem {
            inner: modem.clone(),
        }),
    );
    let at = registry.instance(0).unwrap();

    assert_eq!(at.send_command(LONG, "AT+CSQ").unwrap(), "+CSQ: 15,99\r\n\r\nOK\r\n");
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
    assert_eq!(modem.sent_on(0), vec!["ATE0", "AT+CSQ", "AT+CSQ"]);
}

#[test]
fn test_send_failure_is_reported_and_recovers() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    open(&at);

    modem.fail_sends(1);
    assert!(matches!(
        at.send_command(LONG, "AT+CSQ"),
        Err(AtError::Transport(TransportError::SendFailed { .. }))
    ));
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
    assert_eq!(at.stats().send_failures, 1);
}

#[test]
fn test_open_failure_fails_fast() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(1).unwrap();

    modem.fail_open(true);
    assert!(matches!(
        at.send_command(LONG, "AT+CSQ"),
        Err(AtError::Transport(TransportError::OpenFailed { instance: 1, .. }))
    ));
    assert!(!at.is_open());

    modem.fail_open(false);
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
}

#[test]
fn test_negotiation_failure_is_not_fatal() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply("ATE0", "ERROR\r\n");
    let at = registry.instance(0).unwrap();

    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
    assert_eq!(modem.sent_on(0), vec!["ATE0", "AT+CSQ"]);
}

#[test]
fn test_overflow_drops_buffer_and_recovers() {
    let config = EngineConfig {
        buffer_capacity: 64,
        ..EngineConfig::default()
    };
    let (modem, registry) = setup(config);
    modem.reply_chunks("AT+BIG", vec![vec![b'x'; 40], vec![b'y'; 40]]);
    let at = registry.instance(0).unwrap();

    assert!(matches!(at.send_command(SHORT, "AT+BIG"), Err(AtError::Timeout)));
    assert_eq!(at.stats().overflows, 1);
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
}

#[test]
fn test_oversized_chunk_is_dropped() {
    let (modem, registry) = setup(EngineConfig::default());
    modem.reply_chunks("AT+HUGE", vec![vec![b'z'; 3000]]);
    let at = registry.instance(0).unwrap();

    assert!(matches!(at.send_command(SHORT, "AT+HUGE"), Err(AtError::Timeout)));
    let stats = at.stats();
    assert_eq!(stats.dropped_chunks, 1);
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
    assert_eq!(at.last_response().unwrap().as_ref(), b"+CSQ: 15,99\r\n\r\nOK\r\n");
}

#[test]
fn test_fail_in_flight_overflow_policy() {
    let config = EngineConfig {
        buffer_capacity: 64,
        overflow_policy: OverflowPolicy::FailInFlight,
        ..EngineConfig::default()
    };
    let (modem, registry) = setup(config);
    modem.reply_chunks("AT+BIG", vec![vec![b'x'; 40], vec![b'y'; 40]]);
    let at = registry.instance(0).unwrap();

    let start = Instant::now();
    assert!(matches!(at.send_command(LONG, "AT+BIG"), Err(AtError::Overflow)));
    assert!(start.elapsed() < LONG);
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
}

#[test]
fn test_fail_in_flight_on_oversized_chunk() {
    let config = EngineConfig {
        buffer_capacity: 64,
        overflow_policy: OverflowPolicy::FailInFlight,
        ..EngineConfig::default()
    };
    let (modem, registry) = setup(config);
    modem.reply_chunks("AT+HUGE", vec![vec![b'z'; 100]]);
    let at = registry.instance(0).unwrap();
    open(&at);

    let start = Instant::now();
    assert!(matches!(at.send_command(LONG, "AT+HUGE"), Err(AtError::Overflow)));
    assert!(start.elapsed() < LONG);
    assert_eq!(at.stats().dropped_chunks, 1);
    assert!(at.send_command_expect_ok(LONG, "AT+CSQ"));
}

// ============================================================================
// Lifecycle and concurrency
// ============================================================================

#[test]
fn test_close_and_reopen_keeps_handlers() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    let (seen, cb) = recorder();
    at.add_urc_handler("+CREG:", cb).unwrap();
    open(&at);

    at.close().unwrap();
    assert!(!at.is_open());
    assert!(!modem.is_open(0));
    assert!(at.last_response().is_none());

    open(&at);
    assert_eq!(modem.opens(), 2);
    modem.inject(0, "+CREG: 2\r\n");
    assert_eq!(*seen.lock(), vec!["+CREG: 2"]);
    assert_eq!(modem.sent_on(0), vec!["ATE0", "ATI", "ATE0", "ATI"]);
}

#[test]
fn test_close_fails_pending_command() {
    let (modem, registry) = setup(EngineConfig::default());
    let at = registry.instance(0).unwrap();
    open(&at);

    let waiter = {
        let at = Arc::clone(&at);
        thread::spawn(move || at.send_command(Duration::from_secs(10), "AT+HANG"))
    };
    let deadline = Instant::now() + LONG;
    while !modem.sent_on(0).iter().any(|c| c == "AT+HANG") {
        assert!(Instant::now() < deadline, "command never transmitted");
        thread::sleep(Duration::from_millis(5));
    }

    let start = Instant::now();
    at.close().unwrap();
    assert!(matches!(waiter.join().unwrap(), Err(AtError::Closed)));
    assert!(start.elapsed() < LONG);
}

#[test]
fn test_concurrent_senders_are_serialized() {
    let (modem, registry) = setup(EngineConfig::default());
    for id in 0..8 {
        modem.reply(&format!("AT+ID={}", id), format!("+ID: {}\r\nOK\r\n", id));
    }
    modem.set_reply_delay(Some(Duration::from_millis(5)));
    let at = registry.instance(0).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|id| {
            let at = Arc::clone(&at);
            thread::spawn(move || {
                for _ in 0..5 {
                    let rsp = at.send_command(Duration::from_secs(5), &format!("AT+ID={}", id));
                    assert_eq!(rsp.unwrap(), format!("+ID: {}\r\nOK\r\n", id));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = at.stats();
    assert_eq!(stats.commands_sent, 41);
    assert_eq!(stats.responses, 41);
    assert_eq!(stats.timeouts, 0);
}

#[test]
fn test_instances_are_independent() {
    let (modem, registry) = setup(EngineConfig::default());
    let first = registry.instance(0).unwrap();
    let second = registry.instance(1).unwrap();
    open(&first);

    let blocked = {
        let first = Arc::clone(&first);
        thread::spawn(move || first.send_command(Duration::from_millis(500), "AT+SILENT"))
    };
    assert!(second.send_command_expect_ok(LONG, "AT+CSQ"));
    assert!(matches!(blocked.join().unwrap(), Err(AtError::Timeout)));

    assert_eq!(modem.sent_on(1), vec!["ATE0", "AT+CSQ"]);
}

#[test]
fn test_unknown_instance() {
    let (_modem, registry) = setup(EngineConfig::default());
    assert!(matches!(
        registry.instance(3),
        Err(AtError::UnknownInstance { requested: 3, available: 3 })
    ));
}

#[test]
fn test_close_all() {
    let (modem, registry) = setup(EngineConfig::default());
    for id in 0..3 {
        open(&registry.instance(id).unwrap());
    }
    registry.close_all().unwrap();
    assert!((0..3).all(|id| !modem.is_open(id)));
}
