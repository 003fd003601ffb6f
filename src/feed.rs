use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

/// The result of a bounded-wait [`LineSource::pop`]. `Closed` is only returned once
/// the producer is gone *and* every buffered line has been handed out, so a consumer
/// never loses lines that were queued before the stream ended.
#[derive(Debug, Eq, PartialEq)]
pub enum Popped {
    Line(String),
    TimedOut,
    Closed,
}

/// Producer half of the line feed between the stdout reader thread and the protocol
/// dispatch loop. Dropping the sink (or calling [`LineSink::close`]) signals
/// end-of-stream.
#[derive(Debug)]
pub struct LineSink {
    sender: Sender<String>,
}

/// Consumer half of the line feed. There is exactly one consumer, the dispatch loop.
#[derive(Debug)]
pub struct LineSource {
    receiver: Receiver<String>,
}

/// Creates the unbounded FIFO connecting the reader thread to the dispatch loop.
pub fn line_feed() -> (LineSink, LineSource) {
    let (sender, receiver) = unbounded();
    (LineSink { sender }, LineSource { receiver })
}

impl LineSink {
    /// Never blocks; the feed is unbounded. A push after the source was dropped is
    /// silently discarded, which happens when the dispatch loop exits first.
    pub fn push(&self, line: String) {
        _ = self.sender.send(line);
    }

    pub fn close(self) {
        // dropping the only sender disconnects the channel
    }
}

impl LineSource {
    /// Waits until a line is available, the timeout elapses, or the feed is closed
    /// and drained, whichever comes first.
    pub fn pop(&self, timeout: Duration) -> Popped {
        match self.receiver.recv_timeout(timeout) {
            Ok(line) => Popped::Line(line),
            Err(RecvTimeoutError::Timeout) => Popped::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Popped::Closed,
        }
    }
}
