//! End-to-end tests driving the bundled `woodpusher` fake engine through a real
//! child process, covering the handshake, option traffic and process teardown.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use tethers::engine::{EnginePhase, ProtectionStatus};
use tethers::options::OptionValue;
use tethers::process::{StderrMode, Supervisor};
use tethers::resolve::{FixedPathResolver, NoopPermissionSetter};
use tethers::{EngineBuilder, EngineError, EngineListener, EngineLogger, GoRequest, NoopLogger};

const WOODPUSHER: &str = env!("CARGO_BIN_EXE_woodpusher");
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
enum Event {
    HandshakeComplete,
    Ready,
    Bestmove(String, Option<String>),
    Info(String),
    Protection(String, ProtectionStatus),
}

struct RecordingListener {
    sender: Sender<Event>,
}

impl EngineListener for RecordingListener {
    fn handshake_complete(&self) {
        _ = self.sender.send(Event::HandshakeComplete);
    }

    fn ready(&self) {
        _ = self.sender.send(Event::Ready);
    }

    fn bestmove(&self, mov: &str, ponder: Option<&str>) {
        _ = self.sender.send(Event::Bestmove(mov.to_string(), ponder.map(str::to_string)));
    }

    fn info(&self, line: &str) {
        _ = self.sender.send(Event::Info(line.to_string()));
    }

    fn copy_protection(&self, status: ProtectionStatus) {
        _ = self.sender.send(Event::Protection("copyprotection".to_string(), status));
    }

    fn registration(&self, status: ProtectionStatus) {
        _ = self.sender.send(Event::Protection("registration".to_string(), status));
    }
}

/// Captures `log` calls so tests can assert on diagnostics like exit reports.
struct ChannelLogger {
    sender: Sender<(String, String)>,
}

impl EngineLogger for ChannelLogger {
    fn log(&self, tag: &str, message: &str) {
        _ = self.sender.send((tag.to_string(), message.to_string()));
    }
}

fn launch_woodpusher() -> (tethers::UciEngine, Receiver<Event>) {
    let (sender, events) = unbounded();
    let engine = EngineBuilder::new(WOODPUSHER)
        .listener(Arc::new(RecordingListener { sender }))
        .launch()
        .unwrap();
    (engine, events)
}

/// Waits for an event satisfying the predicate, skipping everything in between.
fn await_event(events: &Receiver<Event>, matches: impl Fn(&Event) -> bool) -> Event {
    loop {
        let event = events.recv_timeout(TIMEOUT).expect("the engine didn't respond in time");
        if matches(&event) {
            return event;
        }
    }
}

fn await_info_containing(events: &Receiver<Event>, needle: &str) -> String {
    let Event::Info(line) =
        await_event(events, |e| matches!(e, Event::Info(line) if line.contains(needle)))
    else {
        unreachable!()
    };
    line
}

#[test]
fn handshake_announces_identity_and_options() {
    let (engine, events) = launch_woodpusher();
    await_event(&events, |e| *e == Event::HandshakeComplete);

    assert_eq!(engine.name().as_deref(), Some("Woodpusher 1.0"));
    assert_eq!(engine.author().as_deref(), Some("The Woodpusher Developers"));
    assert_eq!(engine.phase(), EnginePhase::Ready);
    assert!(engine.is_running());
    assert!(engine.observed_alive());

    let options = engine.options();
    assert_eq!(options.len(), 5);
    let hash = engine.option("Hash").unwrap();
    assert_eq!(hash.spin_value(), Some(16));
    assert_eq!(hash.spin_min(), Some(1));
    assert_eq!(hash.spin_max(), Some(1024));
    assert_eq!(engine.option("Ponder").unwrap().check_value(), Some(false));
    let style = engine.option("Style").unwrap();
    assert_eq!(style.combo_value().as_deref(), Some("Normal"));
    assert_eq!(style.allowed_values().unwrap(), ["Solid", "Normal", "Risky"]);
    assert!(engine.option("Clear Hash").unwrap().is_button());
    // string options declared as <empty> mean an actually empty default
    assert_eq!(engine.option("Book File").unwrap().string_value().as_deref(), Some(""));
    assert!(matches!(engine.option("Book File").unwrap().value, OptionValue::Text(_)));

    // the handshake is followed by an automatic readiness probe
    await_event(&events, |e| *e == Event::Ready);
    engine.quit();
}

#[test]
fn a_timed_search_reports_its_best_move() {
    let (engine, events) = launch_woodpusher();
    engine.new_game();
    await_event(&events, |e| *e == Event::Ready);

    engine.position(Some("8/8/8/8/8/8/8/8 w - - 0 1"), &["e2e4"]);
    engine.go(&GoRequest::movetime(100));
    let event = await_event(&events, |e| matches!(e, Event::Bestmove(..)));
    assert_eq!(event, Event::Bestmove("e2e4".to_string(), Some("e7e5".to_string())));
    engine.quit();
    assert!(!engine.is_running());
}

#[test]
fn an_infinite_search_runs_until_stopped() {
    let (engine, events) = launch_woodpusher();
    engine.new_game();
    await_event(&events, |e| *e == Event::Ready);

    engine.position(None, &[]);
    engine.go(&GoRequest::infinite());
    // the engine searches and reports info lines, but no move yet
    await_event(&events, |e| matches!(e, Event::Info(_)));
    engine.stop();
    let event = await_event(&events, |e| matches!(e, Event::Bestmove(..)));
    assert_eq!(event, Event::Bestmove("e2e4".to_string(), Some("e7e5".to_string())));
    engine.quit();
}

#[test]
fn setting_options_sends_the_wire_commands() {
    let (engine, events) = launch_woodpusher();
    await_event(&events, |e| *e == Event::HandshakeComplete);

    engine.set_spin("Hash", 128).unwrap();
    assert_eq!(
        await_info_containing(&events, "setoption"),
        "info string setoption name Hash value 128"
    );
    assert_eq!(engine.option("Hash").unwrap().spin_value(), Some(128));

    engine.set_combo("Style", "Risky").unwrap();
    assert_eq!(
        await_info_containing(&events, "setoption"),
        "info string setoption name Style value Risky"
    );

    engine.push_button("Clear Hash").unwrap();
    assert_eq!(await_info_containing(&events, "setoption"), "info string setoption name Clear Hash");

    // empty string values travel as the <empty> sentinel
    engine.set_string("Book File", "").unwrap();
    assert_eq!(
        await_info_containing(&events, "setoption"),
        "info string setoption name Book File value <empty>"
    );
    engine.quit();
}

#[test]
fn invalid_option_traffic_fails_without_sending_anything() {
    let (engine, events) = launch_woodpusher();
    await_event(&events, |e| *e == Event::HandshakeComplete);

    let err = engine.set_combo("Style", "Reckless").unwrap_err();
    assert!(matches!(err, EngineError::InvalidOptionValue { .. }));
    assert_eq!(engine.option("Style").unwrap().combo_value().as_deref(), Some("Normal"));

    let err = engine.set_spin("Threads", 4).unwrap_err();
    assert!(matches!(err, EngineError::UnknownOption(name) if name == "Threads"));

    let err = engine.push_button("Hash").unwrap_err();
    assert!(matches!(err, EngineError::InvalidOptionValue { .. }));

    // prove nothing was echoed back by sending something valid afterwards
    engine.set_check("Ponder", true).unwrap();
    assert_eq!(
        await_info_containing(&events, "setoption"),
        "info string setoption name Ponder value true"
    );
    engine.quit();
}

#[test]
fn resolution_fails_before_any_process_exists() {
    let resolver = FixedPathResolver::new("/definitely/not/a/real/engine");
    let err = EngineBuilder::resolve("stockfish", &resolver, &NoopPermissionSetter).unwrap_err();
    assert!(matches!(err, EngineError::ResourceNotFound(_)));
}

#[test]
fn a_supervisor_only_ever_starts_one_process() {
    let logger: Arc<dyn EngineLogger> = Arc::new(NoopLogger);
    let mut supervisor = Supervisor::new(logger);
    let path = std::path::Path::new(WOODPUSHER);
    supervisor.start(path, &[], &StderrMode::Drain).unwrap();
    assert!(matches!(
        supervisor.start(path, &[], &StderrMode::Drain),
        Err(EngineError::AlreadyStarted)
    ));
    supervisor.stop();
    // even a stopped supervisor refuses a second process
    assert!(matches!(
        supervisor.start(path, &[], &StderrMode::Drain),
        Err(EngineError::AlreadyStarted)
    ));
}

// The engine can die at any point relative to the grace wait in `launch`, so the
// pre-handshake death is raced many times: the blocking calls must return no
// matter whether termination is observed before or after `uci` is sent.
#[test]
fn readiness_waits_return_even_when_the_engine_dies_before_the_handshake() {
    for _ in 0..50 {
        let engine = EngineBuilder::new(WOODPUSHER).arg("--die").launch().unwrap();
        assert!(!engine.new_game());
        assert!(!engine.is_ready());
        assert_eq!(engine.phase(), EnginePhase::Terminated);
    }
}

#[test]
fn dying_before_any_output_counts_as_a_failed_launch() {
    let (log_sender, logs) = unbounded();
    let engine = EngineBuilder::new(WOODPUSHER)
        .arg("--die")
        .logger(Arc::new(ChannelLogger { sender: log_sender }))
        .launch()
        .unwrap();

    let (tag, message) = loop {
        let entry = logs.recv_timeout(TIMEOUT).expect("no exit report arrived");
        if entry.0 == "exit" {
            break entry;
        }
    };
    assert_eq!(tag, "exit");
    assert!(message.contains("before producing any output"), "unexpected report: {message}");
    assert!(!engine.observed_alive());
    engine.quit();
}
