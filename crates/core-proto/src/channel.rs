//! Buffered blocking I/O over the worker socket.

use std::io::{IoSliceMut, Write};
use std::os::unix::io::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use thiserror::Error;
use tracing::{info, trace};

use crate::message::*;
use crate::{Answer, Ask, Query, QueryKind, HANDSHAKE_CLIENT, HANDSHAKE_SERVER};

const BUF_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel i/o error: {0}")]
    Io(#[from] Errno),
}

fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    // The executor owns worker fds for the lifetime of their process slot;
    // calls never outlive that.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    loop {
        match nix::unistd::read(fd, buf) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), Errno> {
    while !buf.is_empty() {
        match nix::unistd::write(borrow(fd), buf) {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
            Ok(0) => panic!("channel: write returned zero"),
            Ok(n) => buf = &buf[n..],
        }
    }
    Ok(())
}

pub struct Channel {
    input: Vec<u8>,
    input_pos: usize,
    output: Vec<u8>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    pub fn new() -> Channel {
        Channel {
            input: Vec::with_capacity(BUF_SIZE),
            input_pos: 0,
            output: Vec::with_capacity(BUF_SIZE),
        }
    }

    /// Discard buffered bytes (switching to another worker's socket).
    pub fn reset(&mut self) {
        self.input.clear();
        self.input_pos = 0;
        self.output.clear();
    }

    /// Server side of the handshake: send our magic, expect the client's.
    pub fn handshake(&mut self, fd: RawFd) -> Result<bool, ChannelError> {
        write_all(fd, HANDSHAKE_SERVER)?;
        let mut answer = [0u8; 12];
        let mut got = 0;
        while got < answer.len() {
            let n = read_fd(fd, &mut answer[got..])?;
            if n == 0 {
                return Ok(false);
            }
            got += n;
        }
        let ok = &answer == HANDSHAKE_CLIENT;
        info!(target: "proto", ok, "handshake");
        Ok(ok)
    }

    /// Bounded poll for a pending query (buffered bytes count).
    pub fn has_pending_query(&self, fd: RawFd, timeout_ms: u16) -> Result<bool, ChannelError> {
        if self.input_pos < self.input.len() {
            return Ok(true);
        }
        let borrowed = borrow(fd);
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ChannelError::Io(e)),
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
            }
        }
    }

    /// Compact the buffer and read until `at_least` bytes are available
    /// (`0` means one blocking read of whatever the socket has).
    fn refill(&mut self, fd: RawFd, at_least: usize) -> Result<usize, ChannelError> {
        self.input.drain(..self.input_pos);
        self.input_pos = 0;
        let mut chunk = [0u8; BUF_SIZE];
        loop {
            if at_least > 0 && self.input.len() >= at_least {
                break;
            }
            let n = read_fd(fd, &mut chunk)?;
            if n == 0 {
                if self.input.is_empty() && at_least <= 1 {
                    return Ok(0);
                }
                panic!("channel: unexpected end of stream from worker");
            }
            self.input.extend_from_slice(&chunk[..n]);
            if at_least == 0 {
                break;
            }
        }
        Ok(self.input.len())
    }

    fn available(&self) -> usize {
        self.input.len() - self.input_pos
    }

    fn take(&mut self, fd: RawFd, n: usize) -> Result<&[u8], ChannelError> {
        if self.available() < n {
            self.refill(fd, n)?;
            assert!(self.available() >= n);
        }
        let start = self.input_pos;
        self.input_pos += n;
        Ok(&self.input[start..start + n])
    }

    fn read_u32(&mut self, fd: RawFd) -> Result<u32, ChannelError> {
        let b = self.take(fd, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self, fd: RawFd) -> Result<f32, ChannelError> {
        Ok(f32::from_bits(self.read_u32(fd)?))
    }

    fn read_zstr(&mut self, fd: RawFd) -> Result<String, ChannelError> {
        let mut out = Vec::new();
        loop {
            if self.available() == 0 {
                self.refill(fd, 1)?;
            }
            let c = self.input[self.input_pos];
            self.input_pos += 1;
            if c == 0 {
                break;
            }
            out.push(c);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn read_bytes(&mut self, fd: RawFd, size: usize) -> Result<Vec<u8>, ChannelError> {
        let mut out = Vec::with_capacity(size);
        let buffered = self.available().min(size);
        out.extend_from_slice(&self.input[self.input_pos..self.input_pos + buffered]);
        self.input_pos += buffered;
        while out.len() < size {
            let mut chunk = [0u8; BUF_SIZE];
            let want = (size - out.len()).min(BUF_SIZE);
            let n = read_fd(fd, &mut chunk[..want])?;
            if n == 0 {
                panic!("channel: unexpected end of stream from worker");
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Peek the tag of the next query without consuming it. `None` when no
    /// complete tag is buffered and the socket has nothing to add.
    pub fn peek_tag(&mut self, fd: RawFd) -> Result<Option<[u8; 4]>, ChannelError> {
        if self.available() == 0 && self.refill(fd, 0)? == 0 {
            return Ok(None);
        }
        if self.available() < 4 {
            self.refill(fd, 4)?;
        }
        let b = &self.input[self.input_pos..self.input_pos + 4];
        Ok(Some([b[0], b[1], b[2], b[3]]))
    }

    /// Read one query. `Ok(None)` means the worker closed its socket at a
    /// message boundary.
    pub fn read_query(&mut self, fd: RawFd) -> Result<Option<Query>, ChannelError> {
        if self.available() == 0 && self.refill(fd, 0)? == 0 {
            return Ok(None);
        }
        let tag = self.read_u32(fd)?;
        let time = self.read_u32(fd)?;
        let kind = match tag {
            Q_OPRD | Q_OPWR => {
                let fid = self.read_u32(fd)? as i32;
                let path = self.read_zstr(fd)?;
                QueryKind::Open {
                    fid,
                    path,
                    for_write: tag == Q_OPWR,
                }
            }
            Q_READ => QueryKind::Read {
                fid: self.read_u32(fd)? as i32,
                pos: self.read_u32(fd)?,
                size: self.read_u32(fd)?,
            },
            Q_WRIT => {
                let fid = self.read_u32(fd)? as i32;
                let pos = self.read_u32(fd)?;
                let size = self.read_u32(fd)? as usize;
                let data = self.read_bytes(fd, size)?;
                QueryKind::Write { fid, pos, data }
            }
            Q_CLOS => QueryKind::Close {
                fid: self.read_u32(fd)? as i32,
            },
            Q_SIZE => QueryKind::Size {
                fid: self.read_u32(fd)? as i32,
            },
            Q_SEEN => QueryKind::Seen {
                fid: self.read_u32(fd)? as i32,
                pos: self.read_u32(fd)?,
            },
            Q_GPIC => QueryKind::Gpic {
                path: self.read_zstr(fd)?,
                kind: self.read_u32(fd)? as i32,
                page: self.read_u32(fd)? as i32,
            },
            Q_SPIC => QueryKind::Spic {
                path: self.read_zstr(fd)?,
                kind: self.read_u32(fd)? as i32,
                page: self.read_u32(fd)? as i32,
                bounds: [
                    self.read_f32(fd)?,
                    self.read_f32(fd)?,
                    self.read_f32(fd)?,
                    self.read_f32(fd)?,
                ],
            },
            Q_CHLD => {
                let (pid, child_fd) = recv_child(fd);
                QueryKind::Child { pid, fd: child_fd }
            }
            other => panic!(
                "channel: unknown query tag {:?} ({:02x?})",
                tag_display(other),
                tag_bytes(other)
            ),
        };
        let query = Query { time, kind };
        trace!(target: "proto", time, query = ?query.kind, "query");
        Ok(Some(query))
    }

    pub fn write_answer(&mut self, a: &Answer) {
        trace!(target: "proto", answer = ?a, "answer");
        match a {
            Answer::Done => self.push_u32(A_DONE),
            Answer::Pass => self.push_u32(A_PASS),
            Answer::Fork => self.push_u32(A_FORK),
            Answer::Size(size) => {
                self.push_u32(A_SIZE);
                self.push_u32(*size);
            }
            Answer::Read(data) => {
                self.push_u32(A_READ);
                self.push_u32(data.len() as u32);
                self.output.extend_from_slice(data);
            }
            Answer::Open(path) => {
                self.push_u32(A_OPEN);
                self.push_u32(path.len() as u32);
                self.output.extend_from_slice(path);
            }
            Answer::Gpic(bounds) => {
                self.push_u32(A_GPIC);
                for f in bounds {
                    self.push_u32(f.to_bits());
                }
            }
        }
    }

    pub fn write_ask(&mut self, a: &Ask) {
        trace!(target: "proto", ask = ?a, "ask");
        match a {
            Ask::Flush => self.push_u32(C_FLSH),
        }
    }

    fn push_u32(&mut self, v: u32) {
        self.output.write_all(&v.to_le_bytes()).expect("vec write");
    }

    pub fn flush(&mut self, fd: RawFd) -> Result<(), ChannelError> {
        if !self.output.is_empty() {
            write_all(fd, &self.output)?;
            self.output.clear();
        }
        Ok(())
    }
}

/// Receive the `CHLD` payload: a 4-byte pid plus exactly one descriptor via
/// `SCM_RIGHTS`. Any other shape is a protocol violation.
fn recv_child(fd: RawFd) -> (i32, RawFd) {
    let mut pid_buf = [0u8; 4];
    let mut iov = [IoSliceMut::new(&mut pid_buf)];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);

    let fds: Vec<RawFd>;
    let received;
    loop {
        match recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty()) {
            Err(Errno::EINTR) => continue,
            Err(e) => panic!("channel: recvmsg for CHLD failed: {e}"),
            Ok(msg) => {
                received = msg.bytes;
                fds = msg
                    .cmsgs()
                    .expect("channel: CHLD control message")
                    .filter_map(|c| match c {
                        ControlMessageOwned::ScmRights(fds) => Some(fds),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                break;
            }
        }
    }

    assert_eq!(received, 4, "channel: CHLD carried a short pid");
    assert_eq!(fds.len(), 1, "channel: CHLD must carry exactly one fd");
    let pid = i32::from_le_bytes(pid_buf);
    (pid, fds[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
    use std::os::unix::io::{AsRawFd, OwnedFd};

    fn pair() -> (OwnedFd, OwnedFd) {
        socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .unwrap()
    }

    fn send_query(fd: RawFd, tag: &[u8; 4], time: u32, payload: &[u8]) {
        let mut msg = Vec::new();
        msg.extend_from_slice(tag);
        msg.extend_from_slice(&time.to_le_bytes());
        msg.extend_from_slice(payload);
        write_all(fd, &msg).unwrap();
    }

    #[test]
    fn reads_open_query() {
        let (a, b) = pair();
        let mut payload = Vec::new();
        payload.extend_from_slice(&3u32.to_le_bytes());
        payload.extend_from_slice(b"main.tex\0");
        send_query(b.as_raw_fd(), b"OPRD", 17, &payload);

        let mut c = Channel::new();
        let q = c.read_query(a.as_raw_fd()).unwrap().unwrap();
        assert_eq!(q.time, 17);
        assert_eq!(
            q.kind,
            QueryKind::Open {
                fid: 3,
                path: "main.tex".to_owned(),
                for_write: false,
            }
        );
    }

    #[test]
    fn reads_write_query_with_large_payload() {
        let (a, b) = pair();
        let data = vec![0xABu8; 10000];
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.extend_from_slice(&data);
        let writer = std::thread::spawn({
            let fd = b.as_raw_fd();
            let payload = payload.clone();
            move || send_query(fd, b"WRIT", 0, &payload)
        });

        let mut c = Channel::new();
        let q = c.read_query(a.as_raw_fd()).unwrap().unwrap();
        writer.join().unwrap();
        match q.kind {
            QueryKind::Write { fid, pos, data: d } => {
                assert_eq!((fid, pos), (1, 0));
                assert_eq!(d, data);
            }
            other => panic!("unexpected query {other:?}"),
        }
        drop(b);
    }

    #[test]
    fn eof_at_boundary_is_none() {
        let (a, b) = pair();
        drop(b);
        let mut c = Channel::new();
        assert!(c.read_query(a.as_raw_fd()).unwrap().is_none());
    }

    #[test]
    fn answers_round_trip_bytes() {
        let (a, b) = pair();
        let mut c = Channel::new();
        c.write_answer(&Answer::Read(b"hunk".to_vec()));
        c.flush(a.as_raw_fd()).unwrap();

        let mut buf = [0u8; 12];
        let mut got = 0;
        while got < buf.len() {
            got += read_fd(b.as_raw_fd(), &mut buf[got..]).unwrap();
        }
        assert_eq!(&buf[0..4], b"READ");
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 4);
        assert_eq!(&buf[8..12], b"hunk");
    }

    #[test]
    fn handshake_round_trip() {
        let (a, b) = pair();
        let client = std::thread::spawn({
            let fd = b.as_raw_fd();
            move || {
                let mut magic = [0u8; 12];
                let mut got = 0;
                while got < magic.len() {
                    got += read_fd(fd, &mut magic[got..]).unwrap();
                }
                assert_eq!(&magic, HANDSHAKE_SERVER);
                write_all(fd, HANDSHAKE_CLIENT).unwrap();
            }
        });
        let mut c = Channel::new();
        assert!(c.handshake(a.as_raw_fd()).unwrap());
        client.join().unwrap();
        drop(b);
    }

    #[test]
    fn pending_query_times_out() {
        let (a, _b) = pair();
        let c = Channel::new();
        assert!(!c.has_pending_query(a.as_raw_fd(), 10).unwrap());
    }
}
