//! Thin epoll wrapper.
//!
//! Every registration carries a caller-chosen `u64` token; ready events are
//! reported by token, not by descriptor, so a recycled fd number can never
//! be mistaken for the connection that used it before.

use std::io;
use std::ops::BitOr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Readiness interest for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    pub const PEER_HANGUP: Interest = Interest(libc::EPOLLRDHUP as u32);
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);

    pub const fn empty() -> Interest {
        Interest(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// A decoded ready event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: u64,
    pub mask: u32,
}

impl Event {
    pub fn is_readable(&self) -> bool {
        self.mask & (libc::EPOLLIN | libc::EPOLLPRI) as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.mask & libc::EPOLLOUT as u32 != 0
    }

    /// Peer closed its write side or the whole connection hung up.
    pub fn is_hangup(&self) -> bool {
        self.mask & (libc::EPOLLRDHUP | libc::EPOLLHUP) as u32 != 0
    }

    /// Peer shut down its write side; buffered data may still be readable.
    pub fn is_read_closed(&self) -> bool {
        self.mask & libc::EPOLLRDHUP as u32 != 0
    }

    /// Both directions are gone.
    pub fn is_closed(&self) -> bool {
        self.mask & libc::EPOLLHUP as u32 != 0
    }

    pub fn is_error(&self) -> bool {
        self.mask & libc::EPOLLERR as u32 != 0
    }
}

pub struct Multiplexer {
    epfd: OwnedFd,
    events: Vec<libc::epoll_event>,
    ready: usize,
}

impl Multiplexer {
    /// Creates an epoll instance reporting at most `max_events` per wait.
    pub fn new(max_events: usize) -> io::Result<Self> {
        if max_events == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_events must be positive",
            ));
        }
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd: unsafe { OwnedFd::from_raw_fd(fd) },
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events],
            ready: 0,
        })
    }

    pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Replaces the interest of a registered descriptor. Re-arms one-shot
    /// registrations.
    pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Deregisters `fd`. Unknown or already closed descriptors are ignored.
    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(
                self.epfd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EBADF) => Ok(()),
                _ => Err(err),
            };
        }
        Ok(())
    }

    /// Blocks until at least one registration is ready or `timeout`
    /// elapses (`None` waits forever). Returns the ready count.
    ///
    /// An interrupted wait reports zero events.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            // round up so a 300µs deadline does not spin at 0ms
            Some(d) => {
                let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
                ms.min(i32::MAX as u128) as i32
            }
        };

        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            self.ready = 0;
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        self.ready = n as usize;
        Ok(self.ready)
    }

    /// Token of the `i`th ready event from the last wait.
    ///
    /// # Panics
    ///
    /// Panics if `i` is not below the count returned by the last wait.
    pub fn token(&self, i: usize) -> u64 {
        assert!(i < self.ready, "event index out of range");
        self.events[i].u64
    }

    /// Raw epoll mask of the `i`th ready event.
    pub fn event_mask(&self, i: usize) -> u32 {
        assert!(i < self.ready, "event index out of range");
        self.events[i].events
    }

    pub fn event(&self, i: usize) -> Event {
        Event {
            token: self.token(i),
            mask: self.event_mask(i),
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_readable_after_peer_write() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut mux = Multiplexer::new(8).unwrap();
        mux.add(b.as_raw_fd(), 7, Interest::READABLE).unwrap();

        assert_eq!(mux.wait(Some(Duration::from_millis(10))).unwrap(), 0);

        a.write_all(b"ping").unwrap();
        assert_eq!(mux.wait(Some(Duration::from_secs(1))).unwrap(), 1);
        let ev = mux.event(0);
        assert_eq!(ev.token, 7);
        assert!(ev.is_readable());
        assert!(!ev.is_writable());
    }

    #[test]
    fn test_oneshot_needs_rearm() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let mut mux = Multiplexer::new(8).unwrap();
        let interest = Interest::READABLE | Interest::ONESHOT;
        mux.add(b.as_raw_fd(), 1, interest).unwrap();

        a.write_all(b"x").unwrap();
        assert_eq!(mux.wait(Some(Duration::from_secs(1))).unwrap(), 1);

        // still readable, but disarmed
        assert_eq!(mux.wait(Some(Duration::from_millis(10))).unwrap(), 0);

        mux.modify(b.as_raw_fd(), 1, interest).unwrap();
        assert_eq!(mux.wait(Some(Duration::from_secs(1))).unwrap(), 1);

        let mut buf = [0u8; 1];
        b.read_exact(&mut buf).unwrap();
    }

    #[test]
    fn test_tokens_and_masks_per_event() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let (c, d) = UnixStream::pair().unwrap();
        let mut mux = Multiplexer::new(8).unwrap();
        mux.add(b.as_raw_fd(), u64::MAX - 1, Interest::READABLE).unwrap();
        mux.add(d.as_raw_fd(), 42, Interest::WRITABLE).unwrap();

        a.write_all(b"x").unwrap();
        assert_eq!(mux.wait(Some(Duration::from_secs(1))).unwrap(), 2);

        let mut seen: Vec<_> = (0..2).map(|i| (mux.token(i), mux.event_mask(i))).collect();
        seen.sort();
        assert_eq!(seen[0].0, 42);
        assert_ne!(seen[0].1 & libc::EPOLLOUT as u32, 0);
        assert_eq!(seen[1].0, u64::MAX - 1);
        assert_ne!(seen[1].1 & libc::EPOLLIN as u32, 0);
        drop(c);
    }

    #[test]
    fn test_peer_hangup_reported() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut mux = Multiplexer::new(8).unwrap();
        mux.add(b.as_raw_fd(), 3, Interest::READABLE | Interest::PEER_HANGUP)
            .unwrap();

        drop(a);
        assert_eq!(mux.wait(Some(Duration::from_secs(1))).unwrap(), 1);
        assert!(mux.event(0).is_hangup());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mux = Multiplexer::new(1).unwrap();
        mux.remove(b.as_raw_fd()).unwrap();

        mux.add(b.as_raw_fd(), 1, Interest::WRITABLE).unwrap();
        mux.remove(b.as_raw_fd()).unwrap();
        mux.remove(b.as_raw_fd()).unwrap();
    }

    #[test]
    fn test_interest_flags_compose() {
        let i = Interest::READABLE | Interest::EDGE | Interest::ONESHOT;
        assert!(i.contains(Interest::READABLE));
        assert!(i.contains(Interest::EDGE));
        assert!(!i.contains(Interest::WRITABLE));
        assert_eq!(Interest::empty().bits(), 0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(Multiplexer::new(0).is_err());
    }
}
