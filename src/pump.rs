//! The cooperative event pump substrate: a deadline-ordered queue of timer
//! callbacks and a bounded wait over the transport stream.
//!
//! The pump-loop policy (run due timers, wait, deliver one line) lives on
//! [`crate::browser::Browser`] so timer callbacks can borrow the whole
//! session; this module owns the mechanics.

use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

use futures::future::{self, Either};
use futures::{FutureExt, StreamExt};
use futures_timer::Delay;

use crate::async_process::ExitStatus;
use crate::browser::Browser;
use crate::error::Result;
use crate::transport::Transport;

/// A callback run by the pump when its deadline is reached.
pub type TimerCallback = Box<dyn FnOnce(&mut Browser) + 'static>;

/// Identity of a scheduled callback, for [`EventPump::unschedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

struct TimerEntry<T> {
    deadline: Instant,
    seq: u64,
    token: TimerToken,
    callback: T,
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for TimerEntry<T> {}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TimerEntry<T> {
    // Reversed so the max-heap yields the earliest deadline; sequence
    // numbers keep equal deadlines FIFO.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of scheduled callbacks, earliest deadline first, FIFO on ties.
pub(crate) struct TimerQueue<T> {
    heap: BinaryHeap<TimerEntry<T>>,
    next_seq: u64,
    next_token: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0, next_token: 0 }
    }
}

impl<T> TimerQueue<T> {
    pub fn schedule_at(&mut self, deadline: Instant, callback: T) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(TimerEntry { deadline, seq, token, callback });
        token
    }

    pub fn unschedule(&mut self, token: TimerToken) {
        self.heap.retain(|entry| entry.token != token);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Pop the earliest callback whose deadline has been reached.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        if self.heap.peek()?.deadline <= now {
            Some(self.heap.pop().expect("peeked entry").callback)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Multiplexes the transport with the timer queue for one session.
pub struct EventPump {
    transport: Transport,
    timers: TimerQueue<TimerCallback>,
    /// Complete lines received but not yet dispatched.
    lines: VecDeque<String>,
}

impl EventPump {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport, timers: TimerQueue::default(), lines: VecDeque::new() }
    }

    /// Schedule `callback` to run after `delay`.
    pub fn schedule(
        &mut self,
        delay: Duration,
        callback: impl FnOnce(&mut Browser) + 'static,
    ) -> TimerToken {
        self.schedule_at(Instant::now() + delay, callback)
    }

    /// Schedule `callback` to run at `deadline`.
    pub fn schedule_at(
        &mut self,
        deadline: Instant,
        callback: impl FnOnce(&mut Browser) + 'static,
    ) -> TimerToken {
        self.timers.schedule_at(deadline, Box::new(callback))
    }

    /// Drop every pending entry scheduled under `token`.
    pub fn unschedule(&mut self, token: TimerToken) {
        self.timers.unschedule(token);
    }

    pub(crate) fn pop_due_timer(&mut self, now: Instant) -> Option<TimerCallback> {
        self.timers.pop_due(now)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub(crate) fn pop_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    pub(crate) fn has_queued_lines(&self) -> bool {
        !self.lines.is_empty()
    }

    pub(crate) fn send(&mut self, line: &str) -> Result<()> {
        self.transport.send(line)
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.transport.is_dead()
    }

    pub(crate) fn close_stdin(&mut self) {
        self.transport.close_stdin()
    }

    pub(crate) fn start_kill(&mut self) -> io::Result<()> {
        self.transport.start_kill()
    }

    pub(crate) async fn kill_child(&mut self) -> io::Result<()> {
        self.transport.kill().await
    }

    pub(crate) fn try_wait_child(&mut self) -> io::Result<Option<ExitStatus>> {
        self.transport.try_wait()
    }

    pub(crate) async fn wait_child(&mut self) -> io::Result<ExitStatus> {
        self.transport.wait().await
    }

    /// Wait on the transport for at most `limit` (forever when `None`),
    /// queueing any line that arrives. Polling the transport also flushes
    /// pending writes.
    pub(crate) async fn wait_io(&mut self, limit: Option<Duration>) {
        match limit {
            Some(limit) => {
                let delay = Delay::new(limit);
                match future::select(self.transport.next(), delay).await {
                    Either::Left((Some(line), _)) => self.lines.push_back(line),
                    Either::Left((None, _)) | Either::Right(_) => {}
                }
            }
            None => {
                if let Some(line) = self.transport.next().await {
                    self.lines.push_back(line);
                }
            }
        }
        // a single poll may have framed several lines; drain them now
        while let Some(line) = self.transport.next().now_or_never().flatten() {
            self.lines.push_back(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earlier_deadline_pops_first() {
        let mut queue = TimerQueue::default();
        let now = Instant::now();
        queue.schedule_at(now + Duration::from_millis(100), "f1");
        queue.schedule_at(now + Duration::from_millis(50), "f2");
        let later = now + Duration::from_millis(200);
        assert_eq!(queue.pop_due(later), Some("f2"));
        assert_eq!(queue.pop_due(later), Some("f1"));
        assert_eq!(queue.pop_due(later), None);
    }

    #[test]
    fn equal_deadlines_are_fifo() {
        let mut queue = TimerQueue::default();
        let deadline = Instant::now() + Duration::from_millis(10);
        for n in 0..8 {
            queue.schedule_at(deadline, n);
        }
        let later = deadline + Duration::from_millis(1);
        for n in 0..8 {
            assert_eq!(queue.pop_due(later), Some(n));
        }
    }

    #[test]
    fn not_due_until_deadline() {
        let mut queue = TimerQueue::default();
        let now = Instant::now();
        queue.schedule_at(now + Duration::from_secs(60), "later");
        assert_eq!(queue.pop_due(now), None);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn unschedule_removes_all_entries_for_token() {
        let mut queue = TimerQueue::default();
        let now = Instant::now();
        let token = queue.schedule_at(now, "a");
        queue.schedule_at(now, "b");
        queue.unschedule(token);
        assert_eq!(queue.pop_due(now), Some("b"));
        assert!(queue.is_empty());
    }
}
