//! A deterministic fake UCI engine used by the integration tests. It plays the
//! protocol by the book and always "finds" 1. e4.

use std::io::{stdin, stdout, BufRead, Write};
use std::process::exit;

fn main() {
    if std::env::args().any(|arg| arg == "--die") {
        // simulates a launch that fails before producing any output
        exit(42);
    }
    let stdin = stdin();
    let mut out = stdout();
    let mut search_pending = false;
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            return;
        };
        let mut words = line.split_whitespace();
        let response = match words.next() {
            Some("uci") => {
                "id name Woodpusher 1.0\n\
                id author The Woodpusher Developers\n\
                option name Hash type spin default 16 min 1 max 1024\n\
                option name Ponder type check default false\n\
                option name Style type combo default Normal var Solid var Normal var Risky\n\
                option name Clear Hash type button\n\
                option name Book File type string default <empty>\n\
                uciok"
                    .to_string()
            }
            Some("isready") => "readyok".to_string(),
            // echoed back so tests can observe what arrived over the wire
            Some("setoption") => format!("info string {line}"),
            Some("go") => {
                if line.contains("infinite") {
                    search_pending = true;
                    "info depth 1 score cp 25 pv e2e4".to_string()
                } else {
                    "info depth 1 score cp 25 pv e2e4\nbestmove e2e4 ponder e7e5".to_string()
                }
            }
            Some("stop") => {
                if search_pending {
                    search_pending = false;
                    "bestmove e2e4 ponder e7e5".to_string()
                } else {
                    continue;
                }
            }
            Some("quit") => return,
            // position, ucinewgame, debug, ponderhit need no answer
            _ => continue,
        };
        // unbuffered responses, the client reads line by line
        if writeln!(out, "{response}").and_then(|()| out.flush()).is_err() {
            return;
        }
    }
}
