use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{sleep, Builder};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use crossbeam_utils::sync::{Parker, Unparker};

use crate::common::Res;
use crate::feed::{line_feed, LineSink, LineSource};
use crate::logger::EngineLogger;
use crate::EngineError;

/// How long [`Supervisor::stop`] waits for the child to exit on its own before
/// killing it. The protocol layer sends `quit` beforehand, so a well-behaved engine
/// never runs into the kill.
const STOP_GRACE_PERIOD: Duration = Duration::from_millis(2000);

/// How often the exit watch polls the child for having exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What to do with the child's stderr, which is not part of the UCI protocol.
#[derive(Debug, Default, Clone)]
pub enum StderrMode {
    /// Continuously discard it so the child never blocks on a full pipe.
    #[default]
    Drain,
    /// Redirect it to this file at spawn time.
    File(PathBuf),
}

/// Owns one engine child process: spawns it, exposes its stdin as a line-oriented
/// send surface, and runs the three background threads keeping the process healthy
/// (stdout reader, stderr drain, exit watch). At most one process is ever spawned
/// per instance; `start` after `stop` fails rather than reusing a dead handle.
pub struct Supervisor {
    logger: Arc<dyn EngineLogger>,
    child: Option<Arc<Mutex<Child>>>,
    stdin: Option<ChildStdin>,
    started: bool,
    /// True from the first observed output line until the process exits. This
    /// distinguishes "launched but dead before any output" from "running".
    observed_alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    exit_wakeup: Option<Unparker>,
    first_output: Option<Receiver<()>>,
}

impl Supervisor {
    pub fn new(logger: Arc<dyn EngineLogger>) -> Self {
        Self {
            logger,
            child: None,
            stdin: None,
            started: false,
            observed_alive: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            exit_wakeup: None,
            first_output: None,
        }
    }

    /// Spawns the engine process and its three background threads, returning the
    /// consumer end of the line feed fed by the stdout reader.
    ///
    /// Succeeds at most once per instance: a second call fails with
    /// [`EngineError::AlreadyStarted`] even after `stop`, so a supervisor can never
    /// silently leak a second process. A failed spawn may be retried.
    pub fn start(&mut self, path: &Path, args: &[String], stderr: &StderrMode) -> Res<LineSource> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        let launch_err = |source| EngineError::Launch {
            path: path.display().to_string(),
            source,
        };
        let mut command = Command::new(path);
        command.args(args).stdin(Stdio::piped()).stdout(Stdio::piped());
        match stderr {
            StderrMode::Drain => command.stderr(Stdio::piped()),
            StderrMode::File(log) => command.stderr(File::create(log).map_err(launch_err)?),
        };
        let mut child = command.spawn().map_err(launch_err)?;
        self.started = true;

        let short_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("engine").to_string();
        self.stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout was requested as piped");
        let stderr = child.stderr.take();
        let child = Arc::new(Mutex::new(child));
        self.child = Some(child.clone());
        self.running.store(true, Ordering::SeqCst);

        let (sink, source) = line_feed();
        let (first_tx, first_rx) = bounded(1);
        self.first_output = Some(first_rx);
        let observed_alive = self.observed_alive.clone();
        let running = self.running.clone();
        Builder::new()
            .name(format!("stdout reader ({short_name})"))
            .spawn(move || read_stdout(BufReader::new(stdout), sink, first_tx, observed_alive, running))
            .unwrap();

        if let Some(stderr) = stderr {
            Builder::new()
                .name(format!("stderr drain ({short_name})"))
                .spawn(move || drain_stderr(stderr))
                .unwrap();
        }

        let parker = Parker::new();
        self.exit_wakeup = Some(parker.unparker().clone());
        let logger = self.logger.clone();
        let observed_alive = self.observed_alive.clone();
        let running = self.running.clone();
        let stop_requested = self.stop_requested.clone();
        Builder::new()
            .name(format!("exit watch ({short_name})"))
            .spawn(move || watch_exit(child, parker, logger, observed_alive, running, stop_requested))
            .unwrap();

        Ok(source)
    }

    /// Writes one line to the engine's stdin and flushes immediately. Transport
    /// failures are reported through the logger, never returned: engine crashes are
    /// common and must not take the host down.
    pub fn send_line(&mut self, line: &str) {
        self.logger.message_to_engine(line);
        let Some(stdin) = &mut self.stdin else {
            self.logger.log("send", &format!("dropping '{line}', the engine process is not running"));
            return;
        };
        if let Err(err) = writeln!(stdin, "{line}").and_then(|()| stdin.flush()) {
            self.logger.log("send", &format!("couldn't send '{line}'"));
            self.logger.handle_error(&err);
        }
    }

    /// Requests termination: closes stdin, waits up to the grace period for the
    /// child to exit on its own, then kills it. Idempotent; also stops the exit
    /// watch from reporting the termination as unexpected.
    pub fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // closing stdin makes many engines exit even if they missed 'quit'
        self.stdin = None;
        if let Some(child) = self.child.take() {
            let start = Instant::now();
            let mut exited = false;
            while start.elapsed() < STOP_GRACE_PERIOD {
                if let Ok(Some(_)) = child.lock().unwrap().try_wait() {
                    exited = true;
                    break;
                }
                sleep(EXIT_POLL_INTERVAL);
            }
            if !exited {
                let mut guard = child.lock().unwrap();
                _ = guard.kill();
                // make sure the child isn't left as a zombie
                _ = guard.wait();
            }
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(wakeup) = self.exit_wakeup.take() {
            wakeup.unpark();
        }
    }

    /// Hands out the first-output signal so callers can wait on it without keeping
    /// the supervisor (and whatever lock guards it) borrowed.
    pub(crate) fn first_output_signal(&self) -> Option<Receiver<()>> {
        self.first_output.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn observed_alive(&self) -> bool {
        self.observed_alive.load(Ordering::SeqCst)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_stdout(
    mut stdout: BufReader<impl Read>,
    sink: LineSink,
    first_output: Sender<()>,
    observed_alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    let mut first = true;
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if first {
                    observed_alive.store(true, Ordering::SeqCst);
                    _ = first_output.try_send(());
                    first = false;
                }
                sink.push(line.trim_end().to_string());
            }
        }
    }
    running.store(false, Ordering::SeqCst);
    sink.close();
}

fn drain_stderr(mut stderr: impl Read) {
    let mut buffer = [0u8; 128];
    loop {
        match stderr.read(&mut buffer) {
            Ok(0) | Err(_) => return,
            Ok(_) => (),
        }
    }
}

fn watch_exit(
    child: Arc<Mutex<Child>>,
    parker: Parker,
    logger: Arc<dyn EngineLogger>,
    observed_alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
) {
    let status = loop {
        match child.lock().unwrap().try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if stop_requested.load(Ordering::SeqCst) {
                    // `stop` takes over killing and reaping the child
                    break None;
                }
            }
            Err(_) => break None,
        }
        parker.park_timeout(EXIT_POLL_INTERVAL);
    };
    running.store(false, Ordering::SeqCst);
    if stop_requested.load(Ordering::SeqCst) {
        return;
    }
    let status = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());
    if observed_alive.load(Ordering::SeqCst) {
        logger.log("exit", &format!("the engine terminated ({status})"));
    } else {
        logger.log("exit", &format!("the engine exited before producing any output, treating the launch as failed ({status})"));
    }
}
