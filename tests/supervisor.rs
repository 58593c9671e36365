//! Supervisor integration tests

use std::sync::Arc;
use std::time::Duration;

use kindroid::AdapterError;
use kindroid::backend::StubBackend;
use kindroid::directive::Directive;
use kindroid::flow::{Adapters, ClosingMessages, EndReason, FlowPolicy, FlowState};
use kindroid::identity::FixedResolver;
use kindroid::session::{SessionMode, Speaker};
use kindroid::supervisor::{
    Escalation, HARD_STOP_GRACE, Shutdown, Supervisor, SupervisorOptions, TerminationRequest,
};
use kindroid::voice::{ConsoleSpeech, SpeechIo};

mod common;

use common::{
    Answer, Hear, ScriptedBackend, ScriptedResolver, ScriptedSpeech, adapters, entries, identity,
    outputs, reply_with, say, turn_texts,
};

fn options(restart: bool) -> SupervisorOptions {
    SupervisorOptions {
        mode: SessionMode::Test,
        restart,
        identity_timeout: None,
        policy: FlowPolicy {
            closing: ClosingMessages {
                farewell: Some("Tschüss!".to_string()),
                ..ClosingMessages::default()
            },
            ..FlowPolicy::default()
        },
    }
}

#[tokio::test(start_paused = true)]
async fn single_session_without_restart() {
    let speech = ScriptedSpeech::new(vec![say("hallo")]);
    let backend = Arc::new(ScriptedBackend::new(vec![reply_with(
        "Bis bald!",
        vec![Directive::End],
    )]));
    let adapters = adapters(
        ScriptedResolver::presenting("7"),
        speech,
        backend,
        outputs(false).0,
    );

    let mut supervisor = Supervisor::new(options(false), adapters, Shutdown::new());
    let summary = supervisor.run().await;

    assert_eq!(summary.sessions, 1);
    assert!(!summary.hard_stopped());
    let last = summary.last.expect("one session ran");
    assert_eq!(last.reason, EndReason::Completed);
    assert_eq!(
        turn_texts(last.session.turns()),
        vec![
            (Speaker::User, "hallo".to_string()),
            (Speaker::Agent, "Bis bald!".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn restarts_until_identity_source_disappears() {
    let resolver = ScriptedResolver::new(vec![
        Ok(Some(identity("7"))),
        Ok(Some(identity("8"))),
        Err(AdapterError::DeviceAbsent("camera".to_string())),
    ]);
    let speech = ScriptedSpeech::new(vec![say("eins"), say("zwei")]);
    let backend = Arc::new(ScriptedBackend::new(vec![
        reply_with("Tschau eins", vec![Directive::End]),
        reply_with("Tschau zwei", vec![Directive::End]),
    ]));
    let adapters = adapters(resolver, speech, backend, outputs(false).0);

    let mut supervisor = Supervisor::new(options(true), adapters, Shutdown::new());
    let summary = supervisor.run().await;

    assert_eq!(summary.sessions, 3);
    let last = summary.last.expect("sessions ran");
    assert_eq!(last.reason, EndReason::Device);
    assert!(last.session.identity().is_none());
}

#[tokio::test(start_paused = true)]
async fn closed_console_input_stops_restarting() {
    let console: Box<dyn SpeechIo> = Box::new(ConsoleSpeech::new(
        tokio::io::BufReader::new(&b""[..]),
        tokio::io::sink(),
        Duration::from_secs(10),
    ));
    let adapters = Adapters {
        resolver: Box::new(FixedResolver::new(identity("guest"))),
        speech: console,
        backend: Arc::new(StubBackend::new("ok")),
        output: outputs(false).0,
    };

    let mut supervisor = Supervisor::new(options(true), adapters, Shutdown::new());
    let summary = supervisor.run().await;

    assert_eq!(summary.sessions, 1);
    assert!(!summary.hard_stopped());
    let last = summary.last.expect("one session ran");
    assert_eq!(last.reason, EndReason::InputLost);
    assert_eq!(last.session.identity(), Some(&identity("guest")));
}

#[tokio::test(start_paused = true)]
async fn each_session_gets_a_fresh_session() {
    let shutdown = Shutdown::new();
    let resolver = ScriptedResolver::new(vec![
        Ok(Some(identity("7"))),
        Ok(Some(identity("8"))),
    ]);
    let speech = ScriptedSpeech::new(vec![say("eins"), say("zwei")]);
    let backend = Arc::new(ScriptedBackend::new(vec![
        reply_with("a", vec![Directive::End]),
        reply_with("b", vec![Directive::End]),
    ]));
    let adapters = adapters(resolver, speech, backend, outputs(false).0);

    let mut supervisor = Supervisor::new(options(true), adapters, shutdown);
    let first = supervisor.run_session().await;
    let second = supervisor.run_session().await;

    assert_ne!(first.session.id(), second.session.id());
    assert_eq!(first.session.identity(), Some(&identity("7")));
    assert_eq!(second.session.identity(), Some(&identity("8")));
    assert_eq!(
        turn_texts(second.session.turns()),
        vec![
            (Speaker::User, "zwei".to_string()),
            (Speaker::Agent, "b".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn identity_deadline_ends_the_session() {
    let speech = ScriptedSpeech::new(Vec::new());
    let spoken = speech.spoken();
    let backend = Arc::new(ScriptedBackend::new(Vec::new()));
    let requests = backend.requests();
    let adapters = adapters(ScriptedResolver::nobody(), speech, backend, outputs(false).0);

    let mut options = options(false);
    options.identity_timeout = Some(Duration::from_secs(5));
    let mut supervisor = Supervisor::new(options, adapters, Shutdown::new());

    let started = tokio::time::Instant::now();
    let summary = supervisor.run().await;

    let last = summary.last.expect("one session ran");
    assert_eq!(last.reason, EndReason::IdentityTimeout);
    assert!(last.session.identity().is_none());
    assert_eq!(
        last.transitions,
        vec![FlowState::AwaitingIdentity, FlowState::Ending, FlowState::Ended]
    );
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(entries(&spoken).is_empty());
    assert!(entries(&requests).is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupt_escalation_resets_per_session() {
    let shutdown = Shutdown::new();
    let speech = ScriptedSpeech::new(vec![Hear::Hang, Hear::Hang, Hear::Hang]);
    let listening = speech.listening();
    let spoken = speech.spoken();
    let adapters = adapters(
        FixedResolver::new(identity("7")),
        speech,
        Arc::new(StubBackend::new("ok")),
        outputs(false).0,
    );
    let mut supervisor = Supervisor::new(options(true), adapters, shutdown.clone());

    let signals = async {
        listening.notified().await;
        assert_eq!(
            shutdown.request(TerminationRequest::Interrupt),
            Escalation::Soft
        );
        listening.notified().await;
        assert_eq!(
            shutdown.request(TerminationRequest::Interrupt),
            Escalation::Soft
        );
        listening.notified().await;
        assert_eq!(
            shutdown.request(TerminationRequest::Terminate),
            Escalation::Hard
        );
    };
    let (summary, ()) = tokio::join!(supervisor.run(), signals);

    assert_eq!(summary.sessions, 3);
    assert!(summary.hard_stopped());
    assert!(shutdown.is_stopped());
    // two soft cancellations said goodbye, the hard stop did not
    assert_eq!(
        entries(&spoken),
        vec!["Tschüss!".to_string(), "Tschüss!".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn second_interrupt_stops_the_process() {
    let shutdown = Shutdown::new();
    let speech = ScriptedSpeech::new(vec![say("hallo"), say("noch da?")]).hang_on("Tschüss!");
    let spoken = speech.spoken();
    let stuck = speech.stuck();
    let backend = Arc::new(ScriptedBackend::new(vec![Answer::Hang]));
    let entered = backend.entered();
    let adapters = adapters(
        ScriptedResolver::presenting("7"),
        speech,
        backend,
        outputs(false).0,
    );
    let mut supervisor = Supervisor::new(options(true), adapters, shutdown.clone());

    let signals = async {
        entered.notified().await;
        shutdown.request(TerminationRequest::Interrupt);
        stuck.notified().await;
        shutdown.request(TerminationRequest::Interrupt);
    };
    let (summary, ()) = tokio::join!(supervisor.run(), signals);

    assert_eq!(summary.sessions, 1);
    assert!(summary.hard_stopped());
    assert!(entries(&spoken).is_empty());
}

#[tokio::test(start_paused = true)]
async fn hard_stop_abandons_an_adapter_ignoring_cancellation() {
    let shutdown = Shutdown::new();
    let speech = ScriptedSpeech::new(vec![Hear::Hang])
        .hang_on("Tschüss!")
        .deaf_to_cancel();
    let listening = speech.listening();
    let stuck = speech.stuck();
    let adapters = adapters(
        FixedResolver::new(identity("7")),
        speech,
        Arc::new(StubBackend::new("ok")),
        outputs(false).0,
    );
    let mut options = options(false);
    options.policy.closing_timeout = Duration::from_secs(60);
    let mut supervisor = Supervisor::new(options, adapters, shutdown.clone());

    let signals = async {
        listening.notified().await;
        shutdown.request(TerminationRequest::Interrupt);
        stuck.notified().await;
        shutdown.request(TerminationRequest::Terminate);
    };

    let started = tokio::time::Instant::now();
    let (summary, ()) = tokio::join!(supervisor.run_until_stopped(HARD_STOP_GRACE), signals);

    assert!(summary.is_none());
    assert!(shutdown.is_stopped());
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn hard_stop_with_cooperative_adapters_keeps_the_summary() {
    let shutdown = Shutdown::new();
    let speech = ScriptedSpeech::new(vec![Hear::Hang]).hang_on("Tschüss!");
    let listening = speech.listening();
    let stuck = speech.stuck();
    let adapters = adapters(
        FixedResolver::new(identity("7")),
        speech,
        Arc::new(StubBackend::new("ok")),
        outputs(false).0,
    );
    let mut supervisor = Supervisor::new(options(false), adapters, shutdown.clone());

    let signals = async {
        listening.notified().await;
        shutdown.request(TerminationRequest::Interrupt);
        stuck.notified().await;
        shutdown.request(TerminationRequest::Interrupt);
    };
    let (summary, ()) = tokio::join!(supervisor.run_until_stopped(HARD_STOP_GRACE), signals);

    let summary = summary.expect("session unwound within the grace period");
    assert_eq!(summary.sessions, 1);
    assert!(summary.hard_stopped());
}
