use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::Builder;
use std::time::Duration;

use itertools::Itertools;
use strum_macros::{Display, EnumString};

use crate::common::{tokens, Res, Tokens};
use crate::feed::{LineSource, Popped};
use crate::logger::{EngineLogger, NoopLogger};
use crate::options::EngineOption;
use crate::process::{StderrMode, Supervisor};
use crate::resolve::{default_permission_setter, CatalogResolver, ExecutableResolver, PermissionSetter};
use crate::EngineError;

/// How long the dispatch loop waits for a line before checking whether it should
/// still be running. A timeout here is a liveness poll, not an error.
const DISPATCH_POLL: Duration = Duration::from_millis(1500);

/// Grace period between spawning the process and sending `uci`, so slow-starting
/// engines aren't greeted mid-startup. The wait ends early as soon as the engine
/// produces its first output line.
const STARTUP_GRACE: Duration = Duration::from_millis(250);

/// The protocol states of one engine process lifetime.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Display)]
pub enum EnginePhase {
    #[default]
    Idle,
    /// The process is started and `uci` was sent, awaiting `uciok`.
    Handshaking,
    Ready,
    Terminated,
}

/// The status values of the `copyprotection` and `registration` engine messages.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ProtectionStatus {
    Checking,
    Ok,
    Error,
}

/// Host callbacks for engine events. All methods default to doing nothing.
///
/// Callbacks are invoked from the dispatch thread, one at a time, in the order
/// their triggering lines were received; no two callbacks for the same engine run
/// concurrently. The one exception to thread identity is the [`UciEngine::is_ready`]
/// fast path, which calls [`EngineListener::ready`] on the caller's thread.
pub trait EngineListener: Send + Sync {
    fn handshake_complete(&self) {}

    fn ready(&self) {}

    /// `ponder` is `None` when the engine didn't suggest a ponder move; it is never
    /// an empty string.
    fn bestmove(&self, _mov: &str, _ponder: Option<&str>) {}

    fn copy_protection(&self, _status: ProtectionStatus) {}

    fn registration(&self, _status: ProtectionStatus) {}

    /// The complete `info` line, verbatim. This layer treats `info` as opaque;
    /// higher layers may parse it.
    fn info(&self, _line: &str) {}
}

/// The parameters of a `go` command. Each clause is emitted only when present and
/// meaningful: a non-empty move list, a true flag, a strictly positive number.
#[derive(Debug, Default, Clone)]
pub struct GoRequest {
    pub search_moves: Vec<String>,
    pub ponder: bool,
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub moves_to_go: Option<u64>,
    pub depth: Option<u64>,
    pub nodes: Option<u64>,
    pub mate: Option<u64>,
    pub move_time: Option<u64>,
    pub infinite: bool,
}

impl GoRequest {
    pub fn movetime(ms: u64) -> Self {
        Self { move_time: Some(ms), ..Self::default() }
    }

    pub fn infinite() -> Self {
        Self { infinite: true, ..Self::default() }
    }

    /// Builds the wire command. The clause order is fixed for compatibility with
    /// strict engines, even though the protocol formally allows any order:
    /// `searchmoves ponder wtime btime winc binc movestogo depth nodes mate
    /// movetime infinite`.
    pub fn to_command(&self) -> String {
        let mut cmd = "go".to_string();
        if !self.search_moves.is_empty() {
            write!(cmd, " searchmoves {}", self.search_moves.iter().join(" ")).unwrap();
        }
        if self.ponder {
            cmd.push_str(" ponder");
        }
        let clauses = [
            ("wtime", self.wtime),
            ("btime", self.btime),
            ("winc", self.winc),
            ("binc", self.binc),
            ("movestogo", self.moves_to_go),
            ("depth", self.depth),
            ("nodes", self.nodes),
            ("mate", self.mate),
            ("movetime", self.move_time),
        ];
        for (clause, value) in clauses {
            if let Some(value) = value {
                if value > 0 {
                    write!(cmd, " {clause} {value}").unwrap();
                }
            }
        }
        if self.infinite {
            cmd.push_str(" infinite");
        }
        cmd
    }
}

/// Builds a `position` command: `position startpos` without a FEN, `position fen
/// <fen>` with one, either suffixed with `moves <list>` only when non-empty.
pub fn position_command(fen: Option<&str>, moves: &[&str]) -> String {
    let mut cmd = match fen {
        None => "position startpos".to_string(),
        Some(fen) => format!("position fen {fen}"),
    };
    if !moves.is_empty() {
        write!(cmd, " moves {}", moves.iter().join(" ")).unwrap();
    }
    cmd
}

/// Everything the dispatch thread and the facade share. Protocol state lives under
/// one mutex so host threads never observe a torn multi-field update; the listener
/// has its own lock because callbacks must run without holding the state lock.
struct EngineShared {
    state: Mutex<ProtocolState>,
    /// Signaled on handshake completion and on termination.
    handshake: Condvar,
    listener: Mutex<Option<Arc<dyn EngineListener>>>,
    logger: Arc<dyn EngineLogger>,
}

struct ProtocolState {
    phase: EnginePhase,
    name: Option<String>,
    author: Option<String>,
    handshake_complete: bool,
    /// True only while the most recent readiness probe has been answered with
    /// `readyok` and no command has been sent since.
    ready: bool,
    options: HashMap<String, EngineOption>,
    supervisor: Supervisor,
}

impl EngineShared {
    /// Sends one command line. Every outbound command resets the readiness flag,
    /// since the engine may take time before it would answer a probe again.
    fn send_command(&self, command: &str) {
        let mut state = self.state.lock().unwrap();
        state.ready = false;
        state.supervisor.send_line(command);
    }

    fn listener(&self) -> Option<Arc<dyn EngineListener>> {
        self.listener.lock().unwrap().clone()
    }
}

/// The background half of the protocol engine: pops lines off the feed, classifies
/// them by their first token and updates shared state / fires listener callbacks.
/// Holds only a `Weak` reference so a dropped facade lets the loop wind down.
struct Dispatcher {
    shared: Weak<EngineShared>,
    lines: LineSource,
}

impl Dispatcher {
    fn run(self) {
        loop {
            match self.lines.pop(DISPATCH_POLL) {
                Popped::TimedOut => {
                    if self.shared.upgrade().is_none() {
                        return;
                    }
                }
                Popped::Closed => {
                    if let Some(shared) = self.shared.upgrade() {
                        Self::terminate(&shared);
                    }
                    return;
                }
                Popped::Line(line) => {
                    let Some(shared) = self.shared.upgrade() else {
                        return;
                    };
                    shared.logger.message_from_engine(&line);
                    Self::handle_line(&shared, &line);
                }
            }
        }
    }

    /// The feed closing means the engine's stdout ended, i.e. the process is gone.
    fn terminate(shared: &EngineShared) {
        let mut state = shared.state.lock().unwrap();
        state.phase = EnginePhase::Terminated;
        state.ready = false;
        shared.handshake.notify_all();
    }

    fn handle_line(shared: &EngineShared, line: &str) {
        let mut words = tokens(line);
        let Some(first) = words.next() else {
            // empty lines are ignored, per the protocol
            return;
        };
        match first {
            "readyok" => {
                shared.state.lock().unwrap().ready = true;
                if let Some(listener) = shared.listener() {
                    listener.ready();
                }
            }
            "uciok" => {
                {
                    let mut state = shared.state.lock().unwrap();
                    state.handshake_complete = true;
                    if state.phase != EnginePhase::Terminated {
                        state.phase = EnginePhase::Ready;
                    }
                    shared.handshake.notify_all();
                }
                // probe right away so the engine is known ready as soon as possible
                shared.send_command("isready");
                if let Some(listener) = shared.listener() {
                    listener.handshake_complete();
                }
            }
            "id" => Self::handle_id(shared, words),
            "bestmove" => Self::handle_bestmove(shared, words),
            "info" => {
                if let Some(listener) = shared.listener() {
                    listener.info(line);
                }
            }
            "copyprotection" | "registration" => Self::handle_status(shared, first, words),
            "option" => Self::handle_option(shared, line, first),
            // everything else is ignored for forward compatibility
            _ => (),
        }
    }

    /// Engines shouldn't repeat `id` lines, but if they do the later one wins.
    fn handle_id(shared: &EngineShared, mut words: Tokens) {
        let field = words.next();
        let rest = words.join(" ");
        let mut state = shared.state.lock().unwrap();
        match field {
            Some("name") => state.name = Some(rest),
            Some("author") => state.author = Some(rest),
            _ => { /* ignore unrecognized id keys */ }
        }
    }

    fn handle_bestmove(shared: &EngineShared, mut words: Tokens) {
        let Some(mov) = words.next() else {
            shared.logger.log("dispatch", "missing move after 'bestmove'");
            return;
        };
        let ponder = match (words.next(), words.next()) {
            (Some("ponder"), Some(ponder)) => Some(ponder),
            _ => None,
        };
        if let Some(listener) = shared.listener() {
            listener.bestmove(mov, ponder);
        }
    }

    fn handle_status(shared: &EngineShared, kind: &str, mut words: Tokens) {
        let Some(word) = words.next() else {
            shared.logger.log("dispatch", &format!("missing status after '{kind}'"));
            return;
        };
        let Ok(status) = ProtectionStatus::from_str(word) else {
            shared.logger.log("dispatch", &format!("unrecognized {kind} status '{word}'"));
            return;
        };
        if let Some(listener) = shared.listener() {
            if kind == "copyprotection" {
                listener.copy_protection(status);
            } else {
                listener.registration(status);
            }
        }
    }

    /// One bad declaration must not abort the handshake, so parse failures are
    /// logged and the line is dropped. Repeated declarations are last-write-wins.
    fn handle_option(shared: &EngineShared, line: &str, first: &str) {
        // the reader only trims trailing whitespace, so the line may still be indented
        let declaration = line.trim_start().strip_prefix(first).unwrap_or("").trim_start();
        match EngineOption::parse(declaration) {
            Ok(option) => {
                let mut state = shared.state.lock().unwrap();
                state.options.insert(option.name.clone(), option);
            }
            Err(err) => shared.logger.handle_error(&err),
        }
    }
}

/// Configures and launches a [`UciEngine`].
#[derive(Clone)]
pub struct EngineBuilder {
    path: PathBuf,
    args: Vec<String>,
    stderr: StderrMode,
    logger: Arc<dyn EngineLogger>,
    listener: Option<Arc<dyn EngineListener>>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("stderr", &self.stderr)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: vec![],
            stderr: StderrMode::Drain,
            logger: Arc::new(NoopLogger),
            listener: None,
        }
    }

    /// Locates the executable for `engine_name` through the given resolver and
    /// makes sure it is executable before anything is spawned. Resolution failures
    /// surface as [`EngineError::ResourceNotFound`] before any process exists.
    pub fn resolve(
        engine_name: &str,
        resolver: &dyn ExecutableResolver,
        permissions: &dyn PermissionSetter,
    ) -> Res<Self> {
        let path = resolver.resolve(engine_name)?;
        permissions.ensure_executable(&path);
        Ok(Self::new(path))
    }

    /// Convenience constructor for the bundled engine catalog: looks `engine_name`
    /// (e.g. "stockfish") up in the known-engine table and resolves its executable
    /// inside `dir`.
    pub fn known(engine_name: &str, dir: impl Into<PathBuf>) -> Res<Self> {
        let resolver = CatalogResolver::new(dir);
        Self::resolve(engine_name, &resolver, default_permission_setter().as_ref())
    }

    /// Engines are usually spawned without arguments; this exists for engines that
    /// need flags like `--uci`.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Redirect the engine's stderr into this file instead of draining it.
    pub fn stderr_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = StderrMode::File(path.into());
        self
    }

    pub fn logger(mut self, logger: Arc<dyn EngineLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Spawns the engine process and the dispatch thread, waits out the startup
    /// grace period, and sends `uci`. The handshake itself completes asynchronously;
    /// wait for the listener's `handshake_complete` or call
    /// [`UciEngine::new_game`] / [`UciEngine::is_ready`], which block on it.
    pub fn launch(self) -> Res<UciEngine> {
        let short_name =
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("engine").to_string();
        let shared = Arc::new(EngineShared {
            state: Mutex::new(ProtocolState {
                phase: EnginePhase::Idle,
                name: None,
                author: None,
                handshake_complete: false,
                ready: false,
                options: HashMap::new(),
                supervisor: Supervisor::new(self.logger.clone()),
            }),
            handshake: Condvar::new(),
            listener: Mutex::new(self.listener),
            logger: self.logger,
        });

        let (lines, first_output) = {
            let mut state = shared.state.lock().unwrap();
            let lines = state.supervisor.start(&self.path, &self.args, &self.stderr)?;
            (lines, state.supervisor.first_output_signal())
        };
        let dispatcher = Dispatcher { shared: Arc::downgrade(&shared), lines };
        Builder::new()
            .name(format!("uci dispatch ({short_name})"))
            .spawn(move || dispatcher.run())
            .unwrap();

        // returns early once the engine starts talking
        if let Some(signal) = first_output {
            _ = signal.recv_timeout(STARTUP_GRACE);
        }
        {
            // the dispatcher may already have observed the engine dying during the
            // grace wait; a Terminated phase must never be overwritten, or the
            // handshake condvar would wait for a wakeup that can't come anymore
            let mut state = shared.state.lock().unwrap();
            if state.phase == EnginePhase::Idle {
                state.phase = EnginePhase::Handshaking;
            }
        }
        shared.send_command("uci");
        Ok(UciEngine { shared })
    }
}

/// The public facade over one engine process: protocol commands go in, listener
/// callbacks come out. Dropping the facade quits the engine.
pub struct UciEngine {
    shared: Arc<EngineShared>,
}

impl UciEngine {
    /// The engine's self-declared name (`id name`), unknown until announced.
    pub fn name(&self) -> Option<String> {
        self.shared.state.lock().unwrap().name.clone()
    }

    /// The engine's self-declared author (`id author`), unknown until announced.
    pub fn author(&self) -> Option<String> {
        self.shared.state.lock().unwrap().author.clone()
    }

    pub fn phase(&self) -> EnginePhase {
        self.shared.state.lock().unwrap().phase
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().unwrap().supervisor.is_running()
    }

    /// Whether the process has ever produced output, distinguishing a launch that
    /// never came alive from an engine that died later.
    pub fn observed_alive(&self) -> bool {
        self.shared.state.lock().unwrap().supervisor.observed_alive()
    }

    /// Replaces the active listener; the last registration wins.
    pub fn register_listener(&self, listener: Arc<dyn EngineListener>) {
        *self.shared.listener.lock().unwrap() = Some(listener);
    }

    /// Snapshot of all options the engine declared during the handshake.
    pub fn options(&self) -> Vec<EngineOption> {
        self.shared.state.lock().unwrap().options.values().cloned().collect()
    }

    /// Option identifiers are case-sensitive and may contain spaces.
    pub fn option(&self, name: &str) -> Option<EngineOption> {
        self.shared.state.lock().unwrap().options.get(name).cloned()
    }

    pub fn set_check(&self, name: &str, value: bool) -> Res<()> {
        self.set_option_with(name, |option| option.set_check(value))
    }

    pub fn set_spin(&self, name: &str, value: i64) -> Res<()> {
        self.set_option_with(name, |option| option.set_spin(value))
    }

    /// Fails with [`EngineError::InvalidOptionValue`] for values outside the
    /// declared `var` set, without sending anything.
    pub fn set_combo(&self, name: &str, value: &str) -> Res<()> {
        self.set_option_with(name, |option| option.set_combo(value))
    }

    pub fn set_string(&self, name: &str, value: &str) -> Res<()> {
        self.set_option_with(name, |option| option.set_string(value))
    }

    /// Fires a button option by sending `setoption name <id>` without a value.
    pub fn push_button(&self, name: &str) -> Res<()> {
        let mut state = self.shared.state.lock().unwrap();
        let Some(option) = state.options.get(name) else {
            return Err(EngineError::UnknownOption(name.to_string()));
        };
        if !option.is_button() {
            return Err(EngineError::InvalidOptionValue {
                name: format!("{option}"),
                value: "<button push>".to_string(),
            });
        }
        let command = option.fire_command();
        state.ready = false;
        state.supervisor.send_line(&command);
        Ok(())
    }

    /// Clears the host-set value of an option. Nothing is sent to the engine; the
    /// engine keeps whatever value it currently has.
    pub fn reset_option(&self, name: &str) -> Res<()> {
        let mut state = self.shared.state.lock().unwrap();
        let Some(option) = state.options.get_mut(name) else {
            return Err(EngineError::UnknownOption(name.to_string()));
        };
        option.reset();
        Ok(())
    }

    fn set_option_with(&self, name: &str, set: impl FnOnce(&mut EngineOption) -> Res<()>) -> Res<()> {
        let mut state = self.shared.state.lock().unwrap();
        let Some(option) = state.options.get_mut(name) else {
            return Err(EngineError::UnknownOption(name.to_string()));
        };
        set(option)?;
        if let Some(command) = option.setoption_command() {
            state.ready = false;
            state.supervisor.send_line(&command);
        }
        Ok(())
    }

    /// `position startpos`, or `position fen <fen>`, plus the move list if any.
    pub fn position(&self, fen: Option<&str>, moves: &[&str]) {
        self.shared.send_command(&position_command(fen, moves));
    }

    pub fn go(&self, request: &GoRequest) {
        self.shared.send_command(&request.to_command());
    }

    /// Advisory: the engine decides when it actually stops and answers `bestmove`.
    pub fn stop(&self) {
        self.shared.send_command("stop");
    }

    pub fn ponder_hit(&self) {
        self.shared.send_command("ponderhit");
    }

    pub fn set_debug(&self, on: bool) {
        self.shared.send_command(if on { "debug on" } else { "debug off" });
    }

    /// Sends the `isready` probe, with a deliberately asymmetric contract:
    ///
    /// If the engine is already known ready, the listener's `ready` callback fires
    /// synchronously on the calling thread and this returns `true` without talking
    /// to the process. Otherwise this blocks until the handshake has completed (or
    /// the engine terminated), sends `isready`, and returns the readiness flag *at
    /// the moment of return* — which is typically still `false`, because `readyok`
    /// arrives asynchronously on the dispatch thread. The return value is therefore
    /// not a reliable synchronous answer; callers needing one must wait for the
    /// listener's `ready` callback. Blocking here instead would deadlock a host
    /// that calls this from a listener callback.
    pub fn is_ready(&self) -> bool {
        {
            let state = self.shared.state.lock().unwrap();
            if state.ready {
                drop(state);
                if let Some(listener) = self.shared.listener() {
                    listener.ready();
                }
                return true;
            }
        }
        self.wait_for_handshake();
        self.shared.send_command("isready");
        self.shared.state.lock().unwrap().ready
    }

    /// Blocks until the handshake has completed, sends `ucinewgame` and probes
    /// readiness. The return value carries the same caveat as [`Self::is_ready`].
    pub fn new_game(&self) -> bool {
        self.wait_for_handshake();
        self.shared.send_command("ucinewgame");
        self.is_ready()
    }

    /// Sends `quit` best-effort and tears down the process and all its background
    /// threads. Idempotent.
    pub fn quit(&self) {
        self.shared.send_command("quit");
        let mut state = self.shared.state.lock().unwrap();
        state.phase = EnginePhase::Terminated;
        state.ready = false;
        state.supervisor.stop();
        self.shared.handshake.notify_all();
    }

    /// Suspends the calling thread (never the dispatch loop) until `uciok` was
    /// received. Also wakes on termination, so a crashed engine can't hang its
    /// host forever.
    fn wait_for_handshake(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.handshake_complete && state.phase != EnginePhase::Terminated {
            state = self.shared.handshake.wait(state).unwrap();
        }
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        self.quit();
    }
}
