//! `poll(2)`-based backend (spec.md §4.5), grounded on
//! `src/sys/unix/selector/poll.rs`'s `Vec<pollfd>` + parallel side-table
//! layout and `examples/original_source/poll.c`'s add/recalc/dispatch split
//! (there: a generation counter to know when the `pollfd` array is stale;
//! here: an explicit `dirty` flag serving the same purpose). The recalc step
//! is folded into `dispatch` itself via `rebuild_if_dirty`, rather than
//! exposed as a separate step callers have to remember to invoke.

use super::{Backend, ReportFn};
use crate::event::EventId;
use crate::interest::Interest;
use crate::signal::SignalState;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// `poll`-based backend. No `FD_SETSIZE` ceiling and no per-call O(highest
/// fd) scan, at the cost of rebuilding the `pollfd` vector whenever
/// registrations change.
pub struct PollBackend {
    /// Every id watching a given fd, with its own requested interest —
    /// several ids may share an fd (e.g. a `BufferedEvent`'s separate read
    /// and write events).
    interests: HashMap<RawFd, Vec<(Interest, EventId)>>,
    pollfds: Vec<libc::pollfd>,
    /// Parallel to `pollfds`: the ids reporting against that slot's fd.
    slots: Vec<Vec<(Interest, EventId)>>,
    dirty: bool,
}

impl PollBackend {
    pub fn new() -> io::Result<PollBackend> {
        Ok(PollBackend {
            interests: HashMap::new(),
            pollfds: Vec::new(),
            slots: Vec::new(),
            dirty: false,
        })
    }

    fn rebuild(&mut self) {
        self.pollfds.clear();
        self.slots.clear();
        for (&fd, watchers) in &self.interests {
            let mut events = 0 as libc::c_short;
            for &(interest, _) in watchers {
                if interest.is_read() {
                    events |= libc::POLLIN;
                }
                if interest.is_write() {
                    events |= libc::POLLOUT;
                }
            }
            self.pollfds.push(libc::pollfd { fd, events, revents: 0 });
            self.slots.push(watchers.clone());
        }
        self.dirty = false;
    }

    fn rebuild_if_dirty(&mut self) {
        if self.dirty {
            self.rebuild();
        }
    }
}

impl Backend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn add(&mut self, fd: RawFd, interest: Interest, id: EventId) -> io::Result<()> {
        let watchers = self.interests.entry(fd).or_default();
        if let Some(existing) = watchers.iter_mut().find(|(_, existing_id)| *existing_id == id) {
            existing.0 = interest;
        } else {
            watchers.push((interest, id));
        }
        self.dirty = true;
        Ok(())
    }

    fn del(&mut self, fd: RawFd, id: EventId) -> io::Result<()> {
        if let Some(watchers) = self.interests.get_mut(&fd) {
            watchers.retain(|(_, existing_id)| *existing_id != id);
            if watchers.is_empty() {
                self.interests.remove(&fd);
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        signals: &mut SignalState,
        report: &mut ReportFn<'_>,
    ) -> io::Result<()> {
        self.rebuild_if_dirty();

        signals.deliver()?;

        let timeout_ms: libc::c_int = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let res = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        let res = match res {
            -1 if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted => {
                log::trace!("poll::dispatch: interrupted by a signal");
                0
            }
            -1 => return Err(io::Error::last_os_error()),
            n => n,
        };

        signals.recalc()?;
        signals.process(|id, count| report(id, Interest::SIGNAL, count));

        if res > 0 {
            for (pfd, watchers) in self.pollfds.iter().zip(self.slots.iter()) {
                let mut fd_ready = Interest::NONE;
                if pfd.revents & libc::POLLIN != 0 {
                    fd_ready.insert(Interest::READ);
                }
                if pfd.revents & libc::POLLOUT != 0 {
                    fd_ready.insert(Interest::WRITE);
                }
                if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                    fd_ready.insert(Interest::READ | Interest::WRITE);
                }
                if fd_ready.is_empty() {
                    continue;
                }
                for &(interest, id) in watchers {
                    let ready = fd_ready & interest;
                    if !ready.is_empty() {
                        report(id, ready, 1);
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
    fn add_marks_dirty_and_rebuild_produces_matching_events() {
        let mut backend = PollBackend::new().unwrap();
        backend.add(4, Interest::READ | Interest::WRITE, EventId(0)).unwrap();
        assert!(backend.dirty);
        backend.rebuild_if_dirty();
        assert!(!backend.dirty);
        assert_eq!(backend.pollfds.len(), 1);
        assert_eq!(backend.pollfds[0].fd, 4);
        assert_eq!(backend.pollfds[0].events, libc::POLLIN | libc::POLLOUT);
    }

    #[test]
    fn del_then_rebuild_drops_the_slot() {
        let mut backend = PollBackend::new().unwrap();
        backend.add(4, Interest::READ, EventId(0)).unwrap();
        backend.rebuild_if_dirty();
        backend.del(4, EventId(0)).unwrap();
        backend.rebuild_if_dirty();
        assert!(backend.pollfds.is_empty());
    }

    #[test]
    fn two_ids_on_the_same_fd_share_one_pollfd_slot() {
        let mut backend = PollBackend::new().unwrap();
        backend.add(4, Interest::READ, EventId(0)).unwrap();
        backend.add(4, Interest::WRITE, EventId(1)).unwrap();
        backend.rebuild_if_dirty();
        assert_eq!(backend.pollfds.len(), 1);
        assert_eq!(backend.pollfds[0].events, libc::POLLIN | libc::POLLOUT);
        assert_eq!(backend.slots[0].len(), 2);

        backend.del(4, EventId(0)).unwrap();
        backend.rebuild_if_dirty();
        assert_eq!(backend.pollfds.len(), 1);
        assert_eq!(backend.pollfds[0].events, libc::POLLOUT);
        assert_eq!(backend.slots[0], vec![(Interest::WRITE, EventId(1))]);
    }
}
