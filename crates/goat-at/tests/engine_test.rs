//! Integration tests for the AT engine against a scripted modem.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{deadline, engine, test_config, MockModem};
use goat_at::{AtError, DeviceError, Engine, EngineConfig, ErrorCode, Phase, Status};

fn wait_for(mut cond: impl FnMut() -> bool) {
    let until = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < until, "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}

// ============================================================================
// Command
// ============================================================================

#[test]
fn test_command_frame_sent_once() {
    let (modem, transport) = MockModem::scripted(&[("ATE0\r\n", "\r\nOK\r\n")]);
    let engine = engine(transport);

    let result = engine.command(deadline(1000), "E0").unwrap();

    assert!(result.lines.is_empty());
    assert_eq!(result.status, Status::Ok);
    assert_eq!(modem.writes(), vec![b"ATE0\r\n".to_vec()]);
}

#[test]
fn test_command_cr_line_ending() {
    let (modem, transport) = MockModem::scripted(&[("ATZ\r", "OK\r")]);
    let config = EngineConfig {
        line_ending: goat_at::LineEnding::Cr,
        ..test_config()
    };
    let engine = Engine::new(transport, config).unwrap();

    assert!(engine.command(deadline(1000), "Z").unwrap().is_ok());
    assert_eq!(modem.written(), b"ATZ\r");
}

#[test]
fn test_body_lines_then_error() {
    let (_modem, transport) =
        MockModem::scripted(&[("AT+CPIN?\r\n", "\r\nline one\r\nline two\r\n\r\nERROR\r\n")]);
    let engine = engine(transport);

    let result = engine.command(deadline(1000), "+CPIN?").unwrap();

    assert_eq!(result.lines, vec!["line one", "line two"]);
    assert_eq!(result.status, Status::Error(DeviceError::Generic));
    assert!(matches!(
        result.into_lines(),
        Err(AtError::Device(DeviceError::Generic))
    ));
}

#[test]
fn test_cme_error_code() {
    let (_modem, transport) = MockModem::scripted(&[("AT+CPIN?\r\n", "\r\n+CME ERROR: 3\r\n")]);
    let engine = engine(transport);

    let result = engine.command(deadline(1000), "+CPIN?").unwrap();

    assert!(result.lines.is_empty());
    assert_eq!(
        result.status,
        Status::Error(DeviceError::Cme(ErrorCode::Numeric(3)))
    );
}

#[test]
fn test_ati_end_to_end() {
    let (_modem, transport) =
        MockModem::scripted(&[("ATI\r\n", "ATI\r\nI\r\nModem Model X\r\nOK\r\n")]);
    let engine = engine(transport);

    let result = engine.command(deadline(1000), "I").unwrap();

    assert_eq!(result.lines, vec!["Modem Model X"]);
    assert_eq!(result.status, Status::Ok);
}

#[test]
fn test_slow_device_split_reply() {
    let (modem, transport) = MockModem::silent();
    let engine = Arc::new(engine(transport));

    let caller = {
        let engine = engine.clone();
        thread::spawn(move || engine.command(deadline(2000), "+CGMR"))
    };

    wait_for(|| engine.state().in_flight);
    modem.inject(b"\r\nEC25EF");
    thread::sleep(Duration::from_millis(20));
    modem.inject(b"AR06A06M4G\r\n");
    thread::sleep(Duration::from_millis(20));
    modem.inject(b"\r\nOK\r\n");

    let result = caller.join().unwrap().unwrap();
    assert_eq!(result.lines, vec!["EC25EFAR06A06M4G"]);
}

#[test]
fn test_invalid_command_not_sent() {
    let (modem, transport) = MockModem::silent();
    let engine = engine(transport);

    assert!(matches!(
        engine.command(deadline(100), "E0\r\nATZ"),
        Err(AtError::InvalidCommand(_))
    ));
    assert!(modem.writes().is_empty());
}

// ============================================================================
// Timeouts and draining
// ============================================================================

#[test]
fn test_timeout_releases_gate() {
    let mut calls = 0;
    let (_modem, transport) = MockModem::new(Box::new(move |_| {
        calls += 1;
        if calls == 1 {
            Vec::new()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    }));
    let engine = engine(transport);

    let start = Instant::now();
    assert!(matches!(
        engine.command(start + Duration::from_millis(50), "+CSQ"),
        Err(AtError::Timeout)
    ));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(!engine.state().in_flight);
    assert!(!engine.is_busy());

    // Admitted once the drain window of the abandoned exchange has passed.
    let result = engine.command(deadline(2000), "E0").unwrap();
    assert_eq!(result.status, Status::Ok);
}

#[test]
fn test_stale_lines_not_attributed() {
    let (modem, transport) = MockModem::scripted(&[("AT+CGMI\r\n", "\r\nQuectel\r\n\r\nOK\r\n")]);
    let engine = engine(transport);
    let sub = engine.subscribe();

    assert!(matches!(
        engine.command(deadline(50), "+CSQ"),
        Err(AtError::Timeout)
    ));
    assert!(matches!(engine.phase(), Phase::Draining { .. }));

    // The late reply to +CSQ.
    modem.inject(b"\r\n+CSQ: 17,99\r\n\r\nOK\r\n");
    wait_for(|| engine.phase() == Phase::Idle);

    let result = engine.command(deadline(1000), "+CGMI").unwrap();
    assert_eq!(result.lines, vec!["Quectel"]);
    assert!(sub.try_recv().is_none());
}

#[test]
fn test_drain_max_lines() {
    let (modem, transport) = MockModem::silent();
    let config = EngineConfig {
        drain_max_lines: 2,
        drain_grace_ms: 5000,
        ..test_config()
    };
    let engine = Engine::new(transport, config).unwrap();
    let sub = engine.subscribe();

    assert!(engine.command(deadline(30), "+COPS=?").is_err());
    modem.inject(b"stale 1\r\nstale 2\r\n");
    wait_for(|| engine.phase() == Phase::Idle);

    modem.inject(b"RING\r\n");
    assert_eq!(sub.recv_timeout(Duration::from_secs(1)).unwrap().text, "RING");
}

#[test]
fn test_stale_line_after_grace_is_unsolicited() {
    let (modem, transport) = MockModem::silent();
    let config = EngineConfig {
        drain_grace_ms: 50,
        ..test_config()
    };
    let engine = Engine::new(transport, config).unwrap();
    let sub = engine.subscribe();

    assert!(matches!(
        engine.command(deadline(30), "+COPS=?"),
        Err(AtError::Timeout)
    ));
    assert!(matches!(engine.phase(), Phase::Draining { .. }));
    thread::sleep(Duration::from_millis(100));

    modem.inject(b"\r\n+COPS: (2,\"Operator\")\r\n");
    let notification = sub.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(notification.text, "+COPS: (2,\"Operator\")");
    assert_eq!(engine.phase(), Phase::Idle);
}

#[test]
fn test_command_after_timeout_with_default_drain() {
    let (modem, transport) = MockModem::scripted(&[("ATE0\r\n", "\r\nOK\r\n")]);
    let config = EngineConfig {
        name: "mock".to_string(),
        poll_interval_ms: 5,
        ..Default::default()
    };
    assert_eq!(config.drain_grace_ms, 500);
    let engine = Engine::new(transport, config).unwrap();

    assert!(matches!(
        engine.command(deadline(400), "+CNUM"),
        Err(AtError::Timeout)
    ));
    // The drain gives way before the next caller's deadline.
    let result = engine.command(deadline(400), "E0").unwrap();

    assert_eq!(result.status, Status::Ok);
    assert_eq!(
        modem.writes(),
        vec![b"AT+CNUM\r\n".to_vec(), b"ATE0\r\n".to_vec()]
    );
}

// ============================================================================
// SMS
// ============================================================================

#[test]
fn test_sms_without_prompt_sends_nothing_more() {
    let (modem, transport) = MockModem::silent();
    let engine = engine(transport);

    let result = engine.sms_command(deadline(50), "+CMGS=\"+15165551234\"", "hello go");

    assert!(matches!(result, Err(AtError::PromptNotReceived)));
    assert_eq!(
        modem.writes(),
        vec![b"AT+CMGS=\"+15165551234\"\r\n".to_vec()]
    );
    assert!(!modem.written().contains(&0x1A));
}

#[test]
fn test_sms_with_prompt() {
    let (modem, transport) = MockModem::scripted(&[
        ("AT+CMGS=\"+15165551234\"\r\n", "\r\n> "),
        ("hello go\x1a", "\r\n+CMGS: 12\r\n\r\nOK\r\n"),
    ]);
    let engine = engine(transport);

    let result = engine
        .sms_command(deadline(1000), "+CMGS=\"+15165551234\"", "hello go")
        .unwrap();

    assert_eq!(result.lines, vec!["+CMGS: 12"]);
    assert_eq!(result.status, Status::Ok);
    assert_eq!(
        modem.writes(),
        vec![
            b"AT+CMGS=\"+15165551234\"\r\n".to_vec(),
            b"hello go\x1a".to_vec()
        ]
    );
}

#[test]
fn test_sms_error_instead_of_prompt() {
    let (modem, transport) =
        MockModem::scripted(&[("AT+CMGS=\"+1\"\r\n", "\r\n+CMS ERROR: 304\r\n")]);
    let engine = engine(transport);

    let result = engine.sms_command(deadline(1000), "+CMGS=\"+1\"", "hi").unwrap();

    assert_eq!(
        result.status,
        Status::Error(DeviceError::Cms(ErrorCode::Numeric(304)))
    );
    assert_eq!(modem.writes().len(), 1);
}

#[test]
fn test_sms_rejects_terminator_in_body() {
    let (modem, transport) = MockModem::silent();
    let engine = engine(transport);

    assert!(matches!(
        engine.sms_command(deadline(100), "+CMGS=\"+1\"", "bad\x1abody"),
        Err(AtError::InvalidCommand(_))
    ));
    assert!(modem.writes().is_empty());
}

// ============================================================================
// Init
// ============================================================================

#[test]
fn test_init_twice_with_echo() {
    let (modem, transport) = MockModem::scripted(&[
        ("AT\r\n", "AT\r\r\nOK\r\n"),
        ("AT+CSQ\r\n", "AT+CSQ\r\r\n+CSQ: 17,99\r\n\r\nOK\r\n"),
    ]);
    let engine = engine(transport);

    engine.init(deadline(1000)).unwrap();
    assert!(engine.state().echo_enabled);
    engine.init(deadline(1000)).unwrap();
    let state = engine.state();
    assert!(state.echo_enabled);
    assert!(state.initialized);
    assert_eq!(modem.writes(), vec![b"AT\r\n".to_vec(), b"AT\r\n".to_vec()]);

    let result = engine.command(deadline(1000), "+CSQ").unwrap();
    assert_eq!(result.lines, vec!["+CSQ: 17,99"]);
}

#[test]
fn test_init_twice_with_default_config() {
    let (modem, transport) = MockModem::scripted(&[("AT\r\n", "AT\r\r\nOK\r\n")]);
    let config = EngineConfig {
        poll_interval_ms: 5,
        ..Default::default()
    };
    let engine = Engine::new(transport, config).unwrap();

    engine.init(deadline(1000)).unwrap();
    engine.init(deadline(1000)).unwrap();

    assert!(engine.state().echo_enabled);
    assert_eq!(modem.writes(), vec![b"AT\r\n".to_vec(), b"AT\r\n".to_vec()]);
}

#[test]
fn test_init_without_echo() {
    let (_modem, transport) = MockModem::scripted(&[("AT\r\n", "\r\nOK\r\n")]);
    let engine = engine(transport);

    engine.init(deadline(1000)).unwrap();
    let state = engine.state();
    assert!(!state.echo_enabled);
    assert!(state.initialized);
}

#[test]
fn test_init_no_response() {
    let (_modem, transport) = MockModem::silent();
    let engine = engine(transport);

    assert!(matches!(engine.init(deadline(50)), Err(AtError::NoResponse)));
    assert!(!engine.state().initialized);
}

#[test]
fn test_init_unexpected_device() {
    let (_modem, transport) = MockModem::scripted(&[("AT\r\n", "login: \r\n")]);
    let engine = engine(transport);

    assert!(matches!(
        engine.init(deadline(500)),
        Err(AtError::UnexpectedDevice(_))
    ));
}

#[test]
fn test_init_escape_reply_is_drained() {
    let (modem, transport) = MockModem::scripted(&[
        ("\x1b\r\n", "\r\nERROR\r\n"),
        ("AT\r\n", "\r\nOK\r\n"),
    ]);
    let config = EngineConfig {
        escape_on_init: true,
        escape_grace_ms: 100,
        ..test_config()
    };
    let engine = Engine::new(transport, config).unwrap();

    engine.init(deadline(1000)).unwrap();

    assert!(!engine.state().echo_enabled);
    assert_eq!(
        modem.writes(),
        vec![b"\x1b\r\n".to_vec(), b"AT\r\n".to_vec()]
    );
}

#[test]
fn test_init_runs_init_commands() {
    let (modem, transport) = MockModem::scripted(&[
        ("AT\r\n", "OK\r\n"),
        ("ATE0\r\n", "OK\r\n"),
        ("AT+CMEE=2\r\n", "OK\r\n"),
    ]);
    let config = EngineConfig {
        init_commands: vec!["E0".to_string(), "+CMEE=2".to_string()],
        ..test_config()
    };
    let engine = Engine::new(transport, config).unwrap();

    engine.init(deadline(1000)).unwrap();
    assert_eq!(modem.written(), b"AT\r\nATE0\r\nAT+CMEE=2\r\n");
}

// ============================================================================
// Transport closure
// ============================================================================

#[test]
fn test_transport_closed_is_terminal() {
    let (modem, transport) = MockModem::silent();
    let engine = engine(transport);
    let sub = engine.subscribe();

    modem.close();
    wait_for(|| engine.is_closed());

    assert!(matches!(
        engine.command(deadline(100), "+CSQ"),
        Err(AtError::TransportClosed)
    ));
    assert!(matches!(engine.init(deadline(100)), Err(AtError::TransportClosed)));
    assert!(modem.writes().is_empty());
    assert!(sub.recv_timeout(Duration::from_secs(1)).is_none());
}

#[test]
fn test_write_failure_stops_reader() {
    let (modem, transport) = MockModem::silent();
    let engine = engine(transport);

    modem.break_writes();
    assert!(matches!(
        engine.command(deadline(1000), "+CSQ"),
        Err(AtError::TransportClosed)
    ));
    assert!(engine.is_closed());

    // The engine is still alive; the reader thread exits on its own.
    wait_for(|| modem.reader_dropped());
    drop(engine);
}

#[test]
fn test_close_during_command() {
    let (modem, transport) = MockModem::silent();
    let engine = engine(transport);

    let closer = {
        let modem = modem.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            modem.close();
        })
    };

    let start = Instant::now();
    assert!(matches!(
        engine.command(deadline(5000), "+CSQ"),
        Err(AtError::TransportClosed)
    ));
    assert!(start.elapsed() < Duration::from_secs(2));
    closer.join().unwrap();
}

// ============================================================================
// Unsolicited notifications
// ============================================================================

#[test]
fn test_unsolicited_while_idle() {
    let (modem, transport) = MockModem::silent();
    let engine = engine(transport);
    let first = engine.subscribe();
    let second = engine.subscribe();

    modem.inject(b"\r\nRING\r\n");

    assert_eq!(first.recv_timeout(Duration::from_secs(1)).unwrap().text, "RING");
    assert_eq!(second.recv_timeout(Duration::from_secs(1)).unwrap().text, "RING");
}

#[test]
fn test_line_after_final_result_is_unsolicited() {
    let (_modem, transport) = MockModem::scripted(&[("ATE0\r\n", "OK\r\n+CREG: 1\r\n")]);
    let engine = engine(transport);
    let sub = engine.subscribe();

    let result = engine.command(deadline(1000), "E0").unwrap();

    assert!(result.lines.is_empty());
    assert_eq!(sub.recv_timeout(Duration::from_secs(1)).unwrap().text, "+CREG: 1");
}

#[test]
fn test_indication_during_command() {
    let (_modem, transport) = MockModem::scripted(&[(
        "AT+CSQ\r\n",
        "\r\n+CMTI: \"SM\",3\r\n+CSQ: 17,99\r\n\r\nOK\r\n",
    )]);
    let engine = engine(transport);
    engine.add_indication("+CMTI:", 0).unwrap();
    let sub = engine.subscribe();

    let result = engine.command(deadline(1000), "+CSQ").unwrap();

    assert_eq!(result.lines, vec!["+CSQ: 17,99"]);
    assert_eq!(
        sub.recv_timeout(Duration::from_secs(1)).unwrap().text,
        "+CMTI: \"SM\",3"
    );
}

#[test]
fn test_query_keeps_its_own_indication() {
    let (_modem, transport) =
        MockModem::scripted(&[("AT+CREG?\r\n", "\r\n+CREG: 0,1\r\n\r\nOK\r\n")]);
    let engine = engine(transport);
    engine.add_indication("+CREG:", 0).unwrap();
    let sub = engine.subscribe();

    let result = engine.command(deadline(1000), "+CREG?").unwrap();

    assert_eq!(result.lines, vec!["+CREG: 0,1"]);
    assert!(sub.try_recv().is_none());
}

#[test]
fn test_indication_with_trailing_line() {
    let (modem, transport) = MockModem::silent();
    let config = EngineConfig {
        indications: vec![goat_at::IndicationConfig {
            prefix: "+CMT:".to_string(),
            trailing_lines: 1,
        }],
        ..test_config()
    };
    let engine = Engine::new(transport, config).unwrap();
    let sub = engine.subscribe();

    modem.inject(b"\r\n+CMT: ,24\r\n07911326040000F0\r\n");

    let notification = sub.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(notification.text, "+CMT: ,24");
    assert_eq!(notification.trailing, vec!["07911326040000F0"]);
}

#[test]
fn test_duplicate_indication_rejected() {
    let (_modem, transport) = MockModem::silent();
    let engine = engine(transport);

    engine.add_indication("RING", 0).unwrap();
    assert!(matches!(
        engine.add_indication("RING", 0),
        Err(AtError::IndicationExists(_))
    ));
    assert!(engine.remove_indication("RING"));
}

#[test]
fn test_drop_ends_subscriptions() {
    let (_modem, transport) = MockModem::silent();
    let engine = engine(transport);
    let sub = engine.subscribe();

    drop(engine);
    assert!(sub.recv_timeout(Duration::from_secs(2)).is_none());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_commands_get_their_own_responses() {
    let (modem, transport) = MockModem::new(Box::new(|frame| {
        let text = String::from_utf8_lossy(frame);
        let n = text.trim_end().trim_start_matches("AT+X");
        format!("\r\nR{}\r\n\r\nOK\r\n", n).into_bytes()
    }));
    let engine = Arc::new(engine(transport));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let result = engine.command(deadline(5000), &format!("+X{}", i)).unwrap();
                assert_eq!(result.lines, vec![format!("R{}", i)]);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(modem.writes().len(), 8);
}

#[test]
fn test_queued_caller_times_out_at_gate() {
    let (modem, transport) = MockModem::silent();
    let engine = Arc::new(engine(transport));

    let holder = {
        let engine = engine.clone();
        thread::spawn(move || engine.command(deadline(300), "+COPS=?"))
    };
    wait_for(|| engine.state().in_flight);

    let start = Instant::now();
    assert!(matches!(
        engine.command(start + Duration::from_millis(50), "+CSQ"),
        Err(AtError::Timeout)
    ));
    assert!(start.elapsed() < Duration::from_millis(250));

    assert!(matches!(holder.join().unwrap(), Err(AtError::Timeout)));
    // The queued call never reached the device.
    assert_eq!(modem.writes(), vec![b"AT+COPS=?\r\n".to_vec()]);
}

#[test]
fn test_queued_commands_sent_in_arrival_order() {
    let (modem, transport) = MockModem::new(Box::new(|frame: &[u8]| {
        if frame == b"AT+COPS=?\r\n" {
            Vec::new()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    }));
    let engine = Arc::new(engine(transport));

    let holder = {
        let engine = engine.clone();
        thread::spawn(move || engine.command(deadline(5000), "+COPS=?"))
    };
    wait_for(|| engine.state().in_flight);

    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            engine.command(deadline(5000), &format!("+X{}", i))
        }));
        // Give each caller time to queue before the next arrives.
        thread::sleep(Duration::from_millis(20));
    }

    modem.inject(b"\r\nOK\r\n");
    assert!(holder.join().unwrap().unwrap().is_ok());
    for handle in handles {
        assert!(handle.join().unwrap().unwrap().is_ok());
    }

    let frames: Vec<String> = modem
        .writes()
        .iter()
        .map(|w| String::from_utf8_lossy(w).into_owned())
        .collect();
    assert_eq!(
        frames,
        vec![
            "AT+COPS=?\r\n",
            "AT+X0\r\n",
            "AT+X1\r\n",
            "AT+X2\r\n",
            "AT+X3\r\n"
        ]
    );
}
