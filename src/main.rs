use std::env::Args;
use std::iter::Peekable;
use std::path::PathBuf;
use std::process::{abort, exit};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use colored::Colorize;
use crossbeam_channel::{unbounded, Receiver, Sender};

use tethers::engine::ProtectionStatus;
use tethers::logger::StreamLogger;
use tethers::resolve::CatalogResolver;
use tethers::{EngineBuilder, EngineListener, GoRequest, NoopLogger};

fn main() {
    if let Err(err) = run_program() {
        eprintln!("{}", err.to_string().red());
        abort();
    }
}

/// A small driver around the library: launch an engine, print what it announces,
/// search one position for a fixed time, print the chosen move.
struct CommandLineArgs {
    path: Option<PathBuf>,
    engine: Option<String>,
    dir: PathBuf,
    fen: Option<String>,
    moves: Vec<String>,
    movetime: u64,
    log: Option<String>,
    debug: bool,
}

type ArgIter = Peekable<Args>;

fn get_next_arg(args: &mut ArgIter, name: &str) -> anyhow::Result<String> {
    args.next().ok_or_else(|| anyhow!("missing value after '-{name}'"))
}

fn print_help_message() -> ! {
    println!(
        "usage: tethers [options]\n\
        \x20 -path <file>       run this engine executable\n\
        \x20 -engine <name>     run a well-known engine ({}), resolved inside -dir\n\
        \x20 -dir <directory>   where to look for a well-known engine (default '.')\n\
        \x20 -fen <fen>         search this position instead of the start position\n\
        \x20 -moves <list>      play these moves (comma separated) before searching\n\
        \x20 -movetime <ms>     how long to search (default 1000)\n\
        \x20 -log <target>      log the conversation to a file, 'stdout' or 'stderr'\n\
        \x20 -debug             send 'debug on' to the engine",
        CatalogResolver::engine_names().join(", ")
    );
    exit(0);
}

fn parse_cli() -> anyhow::Result<CommandLineArgs> {
    let mut args = std::env::args().peekable();
    _ = args.next();
    let mut res = CommandLineArgs {
        path: None,
        engine: None,
        dir: PathBuf::from("."),
        fen: None,
        moves: vec![],
        movetime: 1000,
        log: None,
        debug: false,
    };
    while let Some(mut arg) = args.next() {
        // tolerate '--long' in addition to the single-dash style
        if arg.starts_with("--") {
            arg.remove(0);
        }
        match arg.as_str() {
            "-h" | "-help" => print_help_message(),
            "-path" => res.path = Some(PathBuf::from(get_next_arg(&mut args, "path")?)),
            "-engine" => res.engine = Some(get_next_arg(&mut args, "engine")?),
            "-dir" => res.dir = PathBuf::from(get_next_arg(&mut args, "dir")?),
            "-fen" => res.fen = Some(get_next_arg(&mut args, "fen")?),
            "-moves" => {
                res.moves = get_next_arg(&mut args, "moves")?
                    .split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect()
            }
            "-movetime" => res.movetime = get_next_arg(&mut args, "movetime")?.parse()?,
            "-log" => res.log = Some(get_next_arg(&mut args, "log")?),
            "-d" | "-debug" => res.debug = true,
            x => bail!("unrecognized option '{x}'. Type -help for a list of all valid options"),
        }
    }
    Ok(res)
}

/// The engine events the driver waits for, forwarded out of the listener callbacks
/// so the main thread can block on them.
enum Event {
    HandshakeComplete,
    Ready,
    Bestmove(String, Option<String>),
    Info(String),
    Protection(&'static str, ProtectionStatus),
}

struct ChannelListener {
    sender: Sender<Event>,
}

impl EngineListener for ChannelListener {
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
        _ = self.sender.send(Event::Protection("copy protection", status));
    }

    fn registration(&self, status: ProtectionStatus) {
        _ = self.sender.send(Event::Protection("registration", status));
    }
}

fn await_event(events: &Receiver<Event>, what: &str, matches: impl Fn(&Event) -> bool) -> anyhow::Result<Event> {
    let deadline = Duration::from_secs(30);
    loop {
        let event = events
            .recv_timeout(deadline)
            .map_err(|_| anyhow!("the engine didn't respond with {what} within {deadline:?}"))?;
        match &event {
            Event::Info(line) => println!("{}", line.dimmed()),
            Event::Protection(kind, status) => println!("{kind}: {status}"),
            _ => (),
        }
        if matches(&event) {
            return Ok(event);
        }
    }
}

fn run_program() -> anyhow::Result<()> {
    let args = parse_cli()?;

    let mut builder = match (&args.path, &args.engine) {
        (Some(path), None) => EngineBuilder::new(path),
        (None, Some(engine)) => EngineBuilder::known(engine, &args.dir)?,
        (None, None) => bail!("either -path or -engine is required. Type -help for details"),
        (Some(_), Some(_)) => bail!("-path and -engine are mutually exclusive"),
    };
    builder = match &args.log {
        Some(target) => builder.logger(Arc::new(StreamLogger::from_name(target)?)),
        None => builder.logger(Arc::new(NoopLogger)),
    };
    let (sender, events) = unbounded();
    let engine = builder.listener(Arc::new(ChannelListener { sender })).launch()?;

    await_event(&events, "uciok", |e| matches!(e, Event::HandshakeComplete))?;
    println!(
        "{} by {}",
        engine.name().unwrap_or_else(|| "<unnamed engine>".to_string()).bold(),
        engine.author().unwrap_or_else(|| "<unknown author>".to_string())
    );
    let mut options = engine.options();
    options.sort_by(|a, b| a.name.cmp(&b.name));
    for option in &options {
        println!("  {option}");
    }

    if args.debug {
        engine.set_debug(true);
    }
    engine.new_game();
    await_event(&events, "readyok", |e| matches!(e, Event::Ready))?;

    let moves: Vec<&str> = args.moves.iter().map(String::as_str).collect();
    engine.position(args.fen.as_deref(), &moves);
    engine.go(&GoRequest::movetime(args.movetime));
    let Event::Bestmove(mov, ponder) = await_event(&events, "bestmove", |e| matches!(e, Event::Bestmove(..)))?
    else {
        unreachable!("await_event only returns matching events");
    };
    match ponder {
        Some(ponder) => println!("bestmove {} (pondering {ponder})", mov.bold().green()),
        None => println!("bestmove {}", mov.bold().green()),
    }
    engine.quit();
    Ok(())
}
