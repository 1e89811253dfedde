use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io;
use std::pin::Pin;

use futures::stream::Stream;
use futures::task::{Context, Poll};
use futures::{AsyncRead, AsyncWrite};

use crate::async_process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use crate::error::{MonkeyError, Result};

/// Exchanges protocol lines with the browser child over its stdio pipes.
///
/// Outbound lines are queued by [`Transport::send`] and flushed whenever the
/// transport is polled; inbound bytes are split on LF and yielded one
/// complete line per [`Stream`] item, in arrival order. Once the child's
/// stdout reaches EOF or either pipe fails, [`Transport::is_dead`] latches
/// true; lines that were already framed are still yielded before the stream
/// ends.
#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct Transport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    /// Queue of lines to send.
    pending_send: VecDeque<Vec<u8>>,
    /// The line currently on the wire and how much of it has been written.
    in_flight: Option<(Vec<u8>, usize)>,
    /// Inbound bytes not yet terminated by LF.
    partial: Vec<u8>,
    /// Complete inbound lines not yet yielded.
    inbound: VecDeque<String>,
    dead: bool,
}

impl Transport {
    /// Spawn the browser child with the given argv tail and extra
    /// environment, wiring up piped stdin/stdout.
    pub fn spawn<P, I, S, E, K, V>(program: P, args: I, envs: E) -> Result<Self>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
        E: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .envs(envs)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(MonkeyError::Spawn)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            MonkeyError::Spawn(io::Error::new(io::ErrorKind::Other, "child stdout not piped"))
        })?;
        if stdin.is_none() {
            return Err(MonkeyError::Spawn(io::Error::new(
                io::ErrorKind::Other,
                "child stdin not piped",
            )));
        }

        Ok(Self {
            child,
            stdin,
            stdout,
            pending_send: Default::default(),
            in_flight: None,
            partial: Default::default(),
            inbound: Default::default(),
            dead: false,
        })
    }

    /// Queue one protocol line for sending. The trailing LF is appended
    /// here; `line` must not contain one.
    pub fn send(&mut self, line: &str) -> Result<()> {
        if self.dead {
            return Err(MonkeyError::ChildDied);
        }
        tracing::debug!(">>> {line}");
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.pending_send.push_back(bytes);
        Ok(())
    }

    /// True once the child's pipes are gone. Latched.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Close the child's stdin. Any lines still queued are discarded.
    pub fn close_stdin(&mut self) {
        self.pending_send.clear();
        self.in_flight = None;
        self.stdin = None;
    }

    pub async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    /// Deliver the kill signal without awaiting; usable from `Drop`.
    pub fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Flush queued writes as far as the pipe allows right now.
    fn poll_send(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        let stdin = match self.stdin.as_mut() {
            Some(stdin) => stdin,
            None => return Ok(()),
        };
        loop {
            if self.in_flight.is_none() {
                match self.pending_send.pop_front() {
                    Some(line) => self.in_flight = Some((line, 0)),
                    None => break,
                }
            }
            let (line, written) = self.in_flight.as_mut().expect("in flight line");
            match Pin::new(&mut *stdin).poll_write(cx, &line[*written..]) {
                Poll::Ready(Ok(n)) => {
                    *written += n;
                    if *written == line.len() {
                        self.in_flight = None;
                    }
                }
                Poll::Ready(Err(err)) => return Err(err),
                Poll::Pending => return Ok(()),
            }
        }
        // nothing left to write, give the pipe a chance to drain
        let _ = Pin::new(stdin).poll_flush(cx);
        Ok(())
    }

    /// Split freshly read bytes out of `partial` into complete lines.
    fn frame_lines(&mut self) {
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.inbound
                .push_back(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

impl Stream for Transport {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        if let Some(line) = pin.inbound.pop_front() {
            tracing::debug!("<<< {line}");
            return Poll::Ready(Some(line));
        }
        if pin.dead {
            return Poll::Ready(None);
        }

        if let Err(err) = pin.poll_send(cx) {
            tracing::debug!("write to child failed: {err}");
            pin.dead = true;
        }

        // read everything currently available
        let mut buf = [0u8; 8192];
        loop {
            match Pin::new(&mut pin.stdout).poll_read(cx, &mut buf) {
                Poll::Ready(Ok(0)) => {
                    pin.dead = true;
                    break;
                }
                Poll::Ready(Ok(n)) => {
                    pin.partial.extend_from_slice(&buf[..n]);
                    pin.frame_lines();
                }
                Poll::Ready(Err(err)) => {
                    tracing::debug!("read from child failed: {err}");
                    pin.dead = true;
                    break;
                }
                Poll::Pending => break,
            }
        }

        if let Some(line) = pin.inbound.pop_front() {
            tracing::debug!("<<< {line}");
            Poll::Ready(Some(line))
        } else if pin.dead {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}
