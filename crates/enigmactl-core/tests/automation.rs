//! End-to-end automation scenarios against scripted devices.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::{
    framed_bodies, scripted_session, scripted_session_with_injector, streamed_chars,
    write_contains,
};
use enigmactl_core::automation::{
    AutomationEngine, Direction, EngineError, EngineSettings, Message, MessageRecord,
    PlaybackPhase, PlaybackState, Severity,
};
use enigmactl_core::protocol::Session;

fn message(msg: &str, coded: &str, direction: Direction) -> Message {
    Message::from_record(
        MessageRecord {
            msg: msg.to_string(),
            coded: coded.to_string(),
            model: None,
            rotor: None,
            ringset: None,
            ringpos: None,
            plug: None,
            group: None,
        },
        direction,
    )
    .expect("playable record")
}

fn fast_settings() -> EngineSettings {
    EngineSettings {
        message_delay: Duration::from_millis(20),
        character_delay: Duration::ZERO,
        pause_poll: Duration::from_millis(2),
    }
}

/// Replies to streamed characters from a fixed output script; framed
/// commands are accepted.
fn scripted_outputs(outputs: &str) -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    let outputs: Vec<char> = outputs.chars().collect();
    let mut next = 0usize;
    move |w: &[u8]| {
        if w.len() == 1 {
            let input = w[0] as char;
            let output = outputs.get(next).copied().unwrap_or('?');
            next += 1;
            format!("{input} {output} Positions 01 01 {:02}\r\n", next).into_bytes()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    }
}

fn engine_with(
    responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    messages: Vec<Message>,
) -> (AutomationEngine, common::WriteLog) {
    let (session, writes) = scripted_session(responder);
    (
        AutomationEngine::new(session, messages, fast_settings()),
        writes,
    )
}

type NotificationLog = Arc<Mutex<Vec<(Severity, String)>>>;

fn notification_log(engine: AutomationEngine) -> (AutomationEngine, NotificationLog) {
    let log: NotificationLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let engine = engine.with_notifier(Arc::new(move |severity, message| {
        sink.lock().unwrap().push((severity, message.to_string()));
    }));
    (engine, log)
}

#[test]
fn corpus_plays_through_in_order() {
    common::init_tracing();
    let messages = vec![
        message("ABC", "XYZ", Direction::Encode),
        message("DE", "QR", Direction::Encode),
    ];
    let (mut engine, writes) = engine_with(scripted_outputs("XYZQR"), messages);

    engine.run().unwrap();

    assert_eq!(engine.state(), &PlaybackState::Stopped);
    assert_eq!(streamed_chars(&writes), vec!['A', 'B', 'C', 'D', 'E']);

    let status = engine.status().snapshot();
    assert_eq!(status.message_index, 1);
    assert_eq!(status.last_sent, Some('E'));
    assert_eq!(status.last_received, Some('R'));
    assert_eq!(status.rotor_positions.as_deref(), Some("01 01 05"));
}

#[test]
fn decode_direction_streams_ciphertext() {
    let messages = vec![message("ABC", "XYZ", Direction::Decode)];
    let (mut engine, writes) = engine_with(scripted_outputs("ABC"), messages);

    engine.run().unwrap();
    assert_eq!(streamed_chars(&writes), vec!['X', 'Y', 'Z']);
}

#[test]
fn mismatch_pauses_and_resumes_at_the_same_character() {
    // Character 5 of 10 comes back wrong once, then right on the retry.
    let mut replies = "QWERTXYUIOP".chars();
    let responder = move |w: &[u8]| {
        if w.len() == 1 {
            let input = w[0] as char;
            let output = replies.next().unwrap_or('?');
            format!("{input} {output} Positions 01 01 01\r\n").into_bytes()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    };
    let (engine, writes) = engine_with(
        responder,
        vec![message("ABCDEFGHIJ", "QWERTYUIOP", Direction::Encode)],
    );
    let (mut engine, notifications) = notification_log(engine);

    engine.run().unwrap();

    // F was sent twice: once mismatching, once after the pause elapsed.
    // Characters already matched were not resent.
    assert_eq!(
        streamed_chars(&writes),
        "ABCDEFFGHIJ".chars().collect::<Vec<_>>()
    );
    assert_eq!(engine.state(), &PlaybackState::Stopped);

    let notifications = notifications.lock().unwrap();
    assert!(notifications
        .iter()
        .any(|(sev, msg)| *sev == Severity::Warning
            && msg.contains("character 5")
            && msg.contains("expected Y, got X")));
    assert_eq!(engine.status().snapshot().pause_reason, None);
}

#[test]
fn interference_while_paused_slides_the_resume_deadline() {
    // One message, one character: the first reply mismatches, the retry is
    // right. While paused, a bystander presses keys twice; each press must
    // restart the resume window, so playback only resumes a full window
    // after the last press.
    let mut replies = vec!['Q', 'X'].into_iter();
    let responder = move |w: &[u8]| {
        if w.len() == 1 {
            let input = w[0] as char;
            let output = replies.next().unwrap_or('?');
            format!("{input} {output} Positions 01 01 01\r\n").into_bytes()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    };
    let (session, writes, injector) = scripted_session_with_injector(responder);
    let settings = EngineSettings {
        message_delay: Duration::from_millis(50),
        character_delay: Duration::ZERO,
        pause_poll: Duration::from_millis(2),
    };
    let mut engine =
        AutomationEngine::new(session, vec![message("A", "X", Direction::Encode)], settings);

    let presser = thread::spawn(move || {
        // Presses land at ~25ms and ~50ms, each inside the current window.
        for _ in 0..2 {
            thread::sleep(Duration::from_millis(25));
            injector
                .lock()
                .unwrap()
                .extend(b"K Q Positions 01 01 01\r\n".iter().copied());
        }
    });

    let started = Instant::now();
    engine.run().unwrap();
    presser.join().unwrap();
    let elapsed = started.elapsed();

    // Without the sliding deadline the run would resume ~50ms in; the
    // second press pushes the resume past the 100ms mark.
    assert!(
        elapsed >= Duration::from_millis(90),
        "resumed too early: {elapsed:?}"
    );
    assert_eq!(streamed_chars(&writes), vec!['A', 'A']);
    assert_eq!(engine.state(), &PlaybackState::Stopped);
    assert_eq!(engine.status().snapshot().pause_reason, None);
}

#[test]
fn bystander_input_between_messages_pauses_the_next_message() {
    let (session, writes, injector) = scripted_session_with_injector(scripted_outputs("XY"));
    let mut engine = AutomationEngine::new(
        session,
        vec![
            message("A", "X", Direction::Encode),
            message("B", "Y", Direction::Encode),
        ],
        fast_settings(),
    );

    let status = engine.status();
    let phases: Arc<Mutex<Vec<(PlaybackPhase, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let phases = phases.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let snap = status.snapshot();
                phases.lock().unwrap().push((snap.phase, snap.pause_reason));
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    let presser = thread::spawn(move || {
        // Lands inside the 20ms wait between the two messages.
        thread::sleep(Duration::from_millis(8));
        injector
            .lock()
            .unwrap()
            .extend(b"K Q Positions 01 01 01\r\n".iter().copied());
    });

    engine.run().unwrap();
    done.store(true, Ordering::SeqCst);
    sampler.join().unwrap();
    presser.join().unwrap();

    // Both messages still played, one character each, in order.
    assert_eq!(streamed_chars(&writes), vec!['A', 'B']);
    assert_eq!(engine.state(), &PlaybackState::Stopped);

    // The wait turned into an interference pause while the keys were hot.
    let phases = phases.lock().unwrap();
    assert!(
        phases.iter().any(|(phase, reason)| *phase == PlaybackPhase::Paused
            && reason.as_deref() == Some("device input detected")),
        "no interference pause observed: {phases:?}"
    );
}

#[test]
fn config_error_pauses_until_acknowledged() {
    let record = MessageRecord {
        msg: "AB".to_string(),
        coded: "XY".to_string(),
        model: Some("M4".to_string()),
        rotor: Some("B Beta I II III".to_string()),
        ringset: Some("01 01 01 01".to_string()),
        ringpos: Some("01 01 01 01".to_string()),
        plug: None,
        group: None,
    };
    let msg = Message::from_record(record, Direction::Encode).unwrap();

    // First ring-position push is rejected; the retry after the operator
    // acknowledgement succeeds.
    let mut rp_seen = false;
    let mut outputs = vec!['X', 'Y'].into_iter();
    let responder = move |w: &[u8]| {
        if w.len() == 1 {
            let input = w[0] as char;
            let output = outputs.next().unwrap_or('?');
            return format!("{input} {output} Positions 01 01 01 01\r\n").into_bytes();
        }
        if write_contains(w, b"!RP") && !rp_seen {
            rp_seen = true;
            return b"\r\n*** Invalid rotor position\r\n".to_vec();
        }
        b"\r\nOK\r\n".to_vec()
    };

    let (engine, writes) = engine_with(responder, vec![msg]);
    let (mut engine, notifications) = notification_log(engine);
    let handle = engine.handle();

    let acker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.acknowledge_config_error();
    });
    engine.run().unwrap();
    acker.join().unwrap();

    assert_eq!(engine.state(), &PlaybackState::Stopped);
    assert_eq!(streamed_chars(&writes), vec!['A', 'B']);

    // The whole cipher setup was pushed twice, halting at !RP the first time.
    let bodies = framed_bodies(&writes);
    assert_eq!(bodies.iter().filter(|b| b.starts_with("!MO")).count(), 2);
    assert_eq!(bodies.iter().filter(|b| b.starts_with("!RP")).count(), 2);

    let notifications = notifications.lock().unwrap();
    assert!(notifications
        .iter()
        .any(|(sev, msg)| *sev == Severity::Warning && msg.contains("Invalid rotor position")));
}

#[test]
fn stop_request_is_honored_before_any_exchange() {
    let (mut engine, writes) =
        engine_with(scripted_outputs("XYZ"), vec![message("ABC", "XYZ", Direction::Encode)]);
    engine.handle().stop();

    engine.run().unwrap();

    assert_eq!(engine.state(), &PlaybackState::Stopped);
    assert!(streamed_chars(&writes).is_empty());
}

#[test]
fn finished_engine_needs_a_reset_before_rerunning() {
    let (mut engine, _) =
        engine_with(scripted_outputs("X"), vec![message("A", "X", Direction::Encode)]);

    engine.run().unwrap();
    assert!(matches!(engine.run(), Err(EngineError::NotIdle)));

    engine.reset();
    assert_eq!(engine.state(), &PlaybackState::Idle);
}

#[test]
fn unresponsive_device_ends_the_run_as_fatal() {
    // Device never answers characters nor the recovery sequence.
    let (session, writes) = scripted_session(|w: &[u8]| {
        if w.len() == 1 || write_contains(w, b"?MO") {
            Vec::new()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    });
    let engine = AutomationEngine::new(
        session,
        vec![message("AB", "XY", Direction::Encode)],
        fast_settings(),
    );
    let (mut engine, notifications) = notification_log(engine);

    let err = engine.run().unwrap_err();
    assert!(matches!(err, EngineError::Session(_)));
    assert!(matches!(engine.state(), PlaybackState::Error { .. }));

    // The character went out once; after the recovery sequence also went
    // unanswered there is no second attempt.
    assert_eq!(streamed_chars(&writes), vec!['A']);

    let notifications = notifications.lock().unwrap();
    assert!(notifications.iter().any(|(sev, _)| *sev == Severity::Fatal));
    assert!(engine.status().snapshot().error.is_some());
}

#[test]
fn session_is_returned_after_a_run() {
    let (mut engine, _) =
        engine_with(scripted_outputs("X"), vec![message("A", "X", Direction::Encode)]);
    engine.run().unwrap();
    let _session: Session = engine.into_session();
}
