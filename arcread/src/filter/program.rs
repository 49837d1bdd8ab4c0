//! Decompression through an external program.
//!
//! The raw input is written to the child's stdin and its stdout becomes the
//! decoded stream. Both pipes are non-blocking and driven by `poll`, so a
//! program that buffers its output cannot deadlock against us.
use std::{
    borrow::Cow,
    fmt,
    io::{self, Read, Write},
    os::fd::AsFd,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use rustix::{
    event::{PollFd, PollFlags, poll},
    fs::{OFlags, fcntl_getfl, fcntl_setfl},
};

use super::{Filter, FilterBidder, FilterCode};
use crate::{Error, Result, archive::Config, stream::Upstream};

/// Bids for an external command.
///
/// With a signature, the bid is the number of signature bits when the input
/// starts with it. Without one, the first bid wins unconditionally and later
/// bids are zero, so the program is tried exactly once.
pub struct ProgramBidder {
    cmd: String,
    signature: Option<Vec<u8>>,
    inhibit: bool,
}

impl fmt::Debug for ProgramBidder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramBidder")
            .field("cmd", &self.cmd)
            .field("signature", &self.signature.as_deref().map(bstr::BStr::new))
            .finish_non_exhaustive()
    }
}

impl ProgramBidder {
    pub fn new(cmd: impl Into<String>, signature: Option<&[u8]>) -> Self {
        Self {
            cmd: cmd.into(),
            signature: signature.map(<[u8]>::to_vec),
            inhibit: false,
        }
    }
}

impl FilterBidder for ProgramBidder {
    fn name(&self) -> &'static str {
        "program"
    }

    fn key(&self) -> Cow<'_, str> {
        Cow::Owned(format!("program:{}", self.cmd))
    }

    fn bid(&mut self, buf: &[u8]) -> u32 {
        match &self.signature {
            Some(sig) if !sig.is_empty() => {
                if buf.starts_with(sig) {
                    (sig.len() * 8).try_into().unwrap_or(u32::MAX)
                } else {
                    0
                }
            }
            _ if self.inhibit => 0,
            _ => {
                self.inhibit = true;
                u32::MAX
            }
        }
    }

    fn init<'a>(&self, upstream: Upstream<'a>, _config: &Config) -> Result<Box<dyn Filter + 'a>> {
        ProgramFilter::spawn(&self.cmd, upstream).map(|f| Box::new(f) as _)
    }
}

fn set_nonblocking(fd: impl AsFd) -> io::Result<()> {
    let flags = fcntl_getfl(&fd)?;
    fcntl_setfl(&fd, flags | OFlags::NONBLOCK)?;
    Ok(())
}

struct ProgramFilter<'a> {
    cmd: String,
    up: Upstream<'a>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    out: Box<[u8]>,
    pos: usize,
    end: usize,
}

impl<'a> ProgramFilter<'a> {
    fn spawn(cmd: &str, up: Upstream<'a>) -> Result<Self> {
        debug!("program: spawning `{cmd}`");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|err| Error::fatal(format!("cannot run program `{cmd}`: {err}")))?;
        let stdin = child.stdin.take().expect("piped");
        let stdout = child.stdout.take().expect("piped");
        set_nonblocking(&stdin)?;
        set_nonblocking(&stdout)?;
        Ok(Self {
            cmd: cmd.to_owned(),
            up,
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
            out: vec![0u8; 64 << 10].into_boxed_slice(),
            pos: 0,
            end: 0,
        })
    }

    fn reap(&mut self) -> Result<()> {
        self.stdin = None;
        self.stdout = None;
        let status = self.child.wait()?;
        trace!("program: `{}` exited with {status}", self.cmd);
        if !status.success() {
            bail!(Error::fatal(format!(
                "program `{}` exited with {status}",
                self.cmd
            )));
        }
        Ok(())
    }

    /// One round of pumping: wait until a pipe is ready, then move bytes.
    /// Returns the number of decoded bytes placed in `out`.
    fn pump(&mut self) -> Result<usize> {
        if self.stdin.is_some() && self.up.fill()?.is_empty() {
            // Closing stdin lets the program see the end of its input.
            self.stdin = None;
        }
        let stdout = self.stdout.as_ref().expect("pump after end of output");

        let (readable, writable) = {
            let mut fds = vec![PollFd::new(stdout, PollFlags::IN)];
            if let Some(stdin) = &self.stdin {
                fds.push(PollFd::new(stdin, PollFlags::OUT));
            }
            poll(&mut fds, None).map_err(io::Error::from)?;
            let ready = |fd: &PollFd<'_>, want: PollFlags| {
                fd.revents()
                    .intersects(want | PollFlags::HUP | PollFlags::ERR)
            };
            (
                ready(&fds[0], PollFlags::IN),
                fds.get(1).is_some_and(|fd| ready(fd, PollFlags::OUT)),
            )
        };

        if writable {
            let stdin = self.stdin.as_mut().expect("polled");
            let input = self.up.fill()?;
            match stdin.write(input) {
                Ok(n) => self.up.consume(n),
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("program: `{}` stopped reading its input", self.cmd);
                    self.stdin = None;
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if readable {
            let stdout = self.stdout.as_mut().expect("polled");
            match stdout.read(&mut self.out) {
                Ok(0) => {
                    self.reap()?;
                    return Ok(0);
                }
                Ok(n) => return Ok(n),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(0)
    }
}

impl Filter for ProgramFilter<'_> {
    fn name(&self) -> &'static str {
        "program"
    }

    fn code(&self) -> FilterCode {
        FilterCode::PROGRAM
    }

    fn fill(&mut self) -> Result<&[u8]> {
        while self.pos == self.end && self.stdout.is_some() {
            self.pos = 0;
            self.end = self.pump()?;
        }
        Ok(&self.out[self.pos..self.end])
    }

    fn consume(&mut self, amt: usize) {
        assert!(amt <= self.end - self.pos, "consume past decoded bytes");
        self.pos += amt;
    }

    fn raw_position(&self) -> u64 {
        self.up.position()
    }

    fn close(&mut self) -> Result<()> {
        if self.stdout.is_some() {
            // The reader stopped early. A program killed by the closed pipe
            // is not an error here.
            self.stdin = None;
            self.stdout = None;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.up.close()?;
        Ok(())
    }
}
