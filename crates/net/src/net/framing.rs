use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::error::DecodeError;

pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Closed,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn fill_from<R: Read>(&mut self, stream: &mut R) -> io::Result<StreamState> {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(StreamState::Closed),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(StreamState::Open),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if len > MAX_FRAME_LEN {
            return Err(DecodeError::LengthOverflow(len));
        }
        let end = 4 + len as usize;
        if self.buf.len() < end {
            return Ok(None);
        }
        let frame = self.buf[4..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(frame))
    }
}

pub const MAX_WRITE_BACKLOG: usize = 4 * 1024 * 1024;
pub const WRITE_STALL_LIMIT: Duration = Duration::from_millis(1500);

#[derive(Debug, Default)]
pub struct WriteQueue {
    buf: Vec<u8>,
    stalled_since: Option<Instant>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: &[u8]) {
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(payload);
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fails once the backlog outgrows [`MAX_WRITE_BACKLOG`] or the peer took
    /// nothing for [`WRITE_STALL_LIMIT`].
    pub fn flush_to<W: Write>(&mut self, stream: &mut W, now: Instant) -> io::Result<()> {
        let mut written = 0;
        let result = loop {
            if written == self.buf.len() {
                break Ok(());
            }
            match stream.write(&self.buf[written..]) {
                Ok(0) => break Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        self.buf.drain(..written);
        result?;

        if self.buf.is_empty() {
            self.stalled_since = None;
            return Ok(());
        }
        if written > 0 || self.stalled_since.is_none() {
            self.stalled_since = Some(now);
        }
        if self.buf.len() > MAX_WRITE_BACKLOG {
            return Err(io::Error::other(format!(
                "{} bytes waiting for a peer that is not reading",
                self.buf.len()
            )));
        }
        match self.stalled_since {
            Some(since) if now.saturating_duration_since(since) >= WRITE_STALL_LIMIT => Err(
                io::Error::new(ErrorKind::TimedOut, "peer stopped reading"),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut queue = WriteQueue::new();
        for payload in payloads {
            queue.push(payload);
        }
        let mut wire = Vec::new();
        queue.flush_to(&mut wire, Instant::now()).unwrap();
        wire
    }

    struct Throttled {
        taken: Vec<u8>,
        capacity: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.capacity == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.capacity);
            self.capacity -= n;
            self.taken.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_frame_split_across_reads() {
        let wire = framed(&[b"hello", b""]);

        let mut frames = FrameBuffer::new();
        frames.extend(&wire[..3]);
        assert_eq!(frames.next_frame().unwrap(), None);

        frames.extend(&wire[3..]);
        assert_eq!(frames.next_frame().unwrap(), Some(b"hello".to_vec()));
        assert_eq!(frames.next_frame().unwrap(), Some(Vec::new()));
        assert_eq!(frames.next_frame().unwrap(), None);
        assert_eq!(frames.buffered(), 0);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut frames = FrameBuffer::new();
        frames.extend(&u32::MAX.to_be_bytes());
        assert!(matches!(
            frames.next_frame(),
            Err(DecodeError::LengthOverflow(_))
        ));
    }

    #[test]
    fn test_fill_reports_closed_at_eof() {
        let wire = framed(&[&[7, 8]]);

        let mut frames = FrameBuffer::new();
        let state = frames.fill_from(&mut Cursor::new(wire)).unwrap();
        assert_eq!(state, StreamState::Closed);
        assert_eq!(frames.next_frame().unwrap(), Some(vec![7, 8]));
    }

    #[test]
    fn test_full_socket_keeps_rest_queued() {
        let mut queue = WriteQueue::new();
        queue.push(b"abcdef");
        let mut stream = Throttled {
            taken: Vec::new(),
            capacity: 4,
        };
        let now = Instant::now();

        queue.flush_to(&mut stream, now).unwrap();
        assert_eq!(stream.taken, [0, 0, 0, 6]);
        assert_eq!(queue.pending(), 6);

        stream.capacity = 64;
        queue.flush_to(&mut stream, now).unwrap();
        assert!(queue.is_empty());
        assert_eq!(&stream.taken[4..], b"abcdef");
    }

    #[test]
    fn test_peer_that_stops_reading_times_out() {
        let mut queue = WriteQueue::new();
        queue.push(b"ping");
        let mut stream = Throttled {
            taken: Vec::new(),
            capacity: 0,
        };
        let start = Instant::now();

        queue.flush_to(&mut stream, start).unwrap();
        queue
            .flush_to(&mut stream, start + WRITE_STALL_LIMIT / 2)
            .unwrap();
        let err = queue
            .flush_to(&mut stream, start + WRITE_STALL_LIMIT)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_progress_resets_stall_clock() {
        let mut queue = WriteQueue::new();
        queue.push(&[1; 32]);
        let mut stream = Throttled {
            taken: Vec::new(),
            capacity: 8,
        };
        let start = Instant::now();

        queue.flush_to(&mut stream, start).unwrap();
        stream.capacity = 8;
        queue
            .flush_to(&mut stream, start + WRITE_STALL_LIMIT)
            .unwrap();
        assert_eq!(queue.pending(), 20);
    }

    #[test]
    fn test_backlog_limit_drops_peer() {
        let mut queue = WriteQueue::new();
        queue.push(&vec![0; MAX_WRITE_BACKLOG]);
        let mut stream = Throttled {
            taken: Vec::new(),
            capacity: 0,
        };
        assert!(queue.flush_to(&mut stream, Instant::now()).is_err());
    }
}
