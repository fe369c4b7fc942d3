//! `select(2)`-based backend (spec.md §4.5), grounded on
//! `examples/original_source/select.c`'s `selectop` structure: dynamically
//! grown `fd_set`s plus a tracked high-water fd, rebuilt into fresh read/
//! write sets on every dispatch.

use super::{Backend, ReportFn};
use crate::event::EventId;
use crate::interest::Interest;
use crate::signal::SignalState;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Registration record kept per watched fd. Several ids may watch the same
/// `fd` at once (e.g. a `BufferedEvent`'s separate read and write events),
/// so each fd maps to a small list rather than a single entry.
struct Watch {
    interest: Interest,
    id: EventId,
}

/// `select`-based backend. Portable to every POSIX target, but limited by
/// `FD_SETSIZE` and O(highest fd) per call — the fallback of last resort,
/// per spec.md §4.6.
pub struct SelectBackend {
    watches: HashMap<RawFd, Vec<Watch>>,
    max_fd: RawFd,
}

impl SelectBackend {
    pub fn new() -> io::Result<SelectBackend> {
        Ok(SelectBackend {
            watches: HashMap::new(),
            max_fd: -1,
        })
    }

    fn recompute_max_fd(&mut self) {
        self.max_fd = self.watches.keys().copied().max().unwrap_or(-1);
    }
}

impl Backend for SelectBackend {
    fn name(&self) -> &'static str {
        "select"
    }

    fn add(&mut self, fd: RawFd, interest: Interest, id: EventId) -> io::Result<()> {
        let slot = self.watches.entry(fd).or_default();
        if let Some(existing) = slot.iter_mut().find(|w| w.id == id) {
            existing.interest = interest;
        } else {
            slot.push(Watch { interest, id });
        }
        if fd > self.max_fd {
            self.max_fd = fd;
        }
        Ok(())
    }

    fn del(&mut self, fd: RawFd, id: EventId) -> io::Result<()> {
        if let Some(slot) = self.watches.get_mut(&fd) {
            slot.retain(|w| w.id != id);
            if slot.is_empty() {
                self.watches.remove(&fd);
            }
        }
        if fd == self.max_fd {
            self.recompute_max_fd();
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        signals: &mut SignalState,
        report: &mut ReportFn<'_>,
    ) -> io::Result<()> {
        // SAFETY: `fd_set` is a plain-old-data type; zeroing is a valid
        // "empty set" per POSIX semantics (mirrored by `FD_ZERO`).
        let mut readset: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut writeset: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut readset);
            libc::FD_ZERO(&mut writeset);
        }

        for (&fd, slot) in &self.watches {
            for watch in slot {
                if watch.interest.is_read() {
                    unsafe { libc::FD_SET(fd, &mut readset) };
                }
                if watch.interest.is_write() {
                    unsafe { libc::FD_SET(fd, &mut writeset) };
                }
            }
        }

        signals.deliver()?;

        let mut tv = timeout.map(|d| libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        });

        let nfds = self.max_fd + 1;
        let res = unsafe {
            libc::select(
                nfds,
                &mut readset,
                &mut writeset,
                std::ptr::null_mut(),
                tv.as_mut().map_or(std::ptr::null_mut(), |tv| tv as *mut _),
            )
        };

        let res = match res {
            -1 if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted => {
                log::trace!("select::dispatch: interrupted by a signal");
                0
            }
            -1 => return Err(io::Error::last_os_error()),
            n => n,
        };

        signals.recalc()?;
        signals.process(|id, count| report(id, Interest::SIGNAL, count));

        if res > 0 {
            for (&fd, slot) in &self.watches {
                let fd_readable = unsafe { libc::FD_ISSET(fd, &readset) };
                let fd_writable = unsafe { libc::FD_ISSET(fd, &writeset) };
                for watch in slot {
                    let mut ready = Interest::NONE;
                    if watch.interest.is_read() && fd_readable {
                        ready.insert(Interest::READ);
                    }
                    if watch.interest.is_write() && fd_writable {
                        ready.insert(Interest::WRITE);
                    }
                    if !ready.is_empty() {
                        report(watch.id, ready, 1);
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_tracks_the_highest_fd() {
        let mut backend = SelectBackend::new().unwrap();
        backend.add(3, Interest::READ, EventId(0)).unwrap();
        backend.add(7, Interest::WRITE, EventId(1)).unwrap();
        backend.add(5, Interest::READ, EventId(2)).unwrap();
        assert_eq!(backend.max_fd, 7);
    }

    #[test]
    fn del_of_the_highest_fd_recomputes_the_max() {
        let mut backend = SelectBackend::new().unwrap();
        backend.add(3, Interest::READ, EventId(0)).unwrap();
        backend.add(7, Interest::WRITE, EventId(1)).unwrap();
        backend.del(7, EventId(1)).unwrap();
        assert_eq!(backend.max_fd, 3);
    }

    #[test]
    fn del_of_an_unknown_fd_is_a_noop() {
        let mut backend = SelectBackend::new().unwrap();
        backend.add(3, Interest::READ, EventId(0)).unwrap();
        backend.del(99, EventId(0)).unwrap();
        assert_eq!(backend.max_fd, 3);
    }

    #[test]
    fn two_ids_on_the_same_fd_are_tracked_and_removed_independently() {
        let mut backend = SelectBackend::new().unwrap();
        backend.add(3, Interest::READ, EventId(0)).unwrap();
        backend.add(3, Interest::WRITE, EventId(1)).unwrap();
        assert_eq!(backend.watches.get(&3).map(Vec::len), Some(2));
        backend.del(3, EventId(0)).unwrap();
        let slot = backend.watches.get(&3).unwrap();
        assert_eq!(slot.len(), 1);
        assert_eq!(slot[0].id, EventId(1));
    }
}
