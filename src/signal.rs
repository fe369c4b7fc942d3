//! Signal subsystem (spec.md §4.3): a safe bridge between asynchronous OS
//! signal delivery and the synchronous, single-threaded dispatch loop.
//!
//! The handler installed with the OS does nothing but bump a per-signal
//! atomic counter and set a process-wide "caught" flag — no allocations, no
//! locks, no non-reentrant calls, per the async-signal-safety rules spec.md
//! requires. Everything else (looking up which events care about a signal,
//! invoking callbacks) happens later, synchronously, in `process`.

use crate::event::EventId;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Upper bound on signal numbers we track; generous enough for every
/// standard and realtime signal on Linux/BSD.
const NSIG: usize = 128;

static CAUGHT: AtomicBool = AtomicBool::new(false);
static COUNTERS: [AtomicU32; NSIG] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicU32 = AtomicU32::new(0);
    [ZERO; NSIG]
};

/// The signal handler installed with the OS. Must stay async-signal-safe.
extern "C" fn bump(signum: libc::c_int) {
    let idx = signum as usize;
    if idx < NSIG {
        COUNTERS[idx].fetch_add(1, Ordering::Relaxed);
    }
    CAUGHT.store(true, Ordering::Release);
}

/// Owns the per-signal event lists and the previous-disposition bookkeeping
/// needed to restore signal handlers once a signal is no longer watched.
///
/// Unlike the signal *mask*, which is only widened for the duration of the
/// backend's blocking call (`deliver`/`recalc`, below), the `sigaction`
/// handler itself is installed once, the first time a signal gains a
/// watcher, and stays installed for as long as anything watches it — a
/// signal raised between dispatch iterations (the common case) must still
/// reach `bump`, not whatever disposition predates the reactor.
#[derive(Default)]
pub struct SignalState {
    lists: std::collections::HashMap<i32, Vec<EventId>>,
    installed: std::collections::HashMap<i32, libc::sigaction>,
    previous_mask: Option<libc::sigset_t>,
}

impl SignalState {
    pub fn new() -> SignalState {
        SignalState::default()
    }

    pub fn add(&mut self, signum: i32, id: EventId) {
        self.lists.entry(signum).or_default().push(id);
    }

    pub fn remove(&mut self, signum: i32, id: EventId) {
        if let Some(list) = self.lists.get_mut(&signum) {
            list.retain(|existing| *existing != id);
            if list.is_empty() {
                self.lists.remove(&signum);
                let _ = self.uninstall(signum);
            }
        }
    }

    pub fn has_signals(&self) -> bool {
        !self.lists.is_empty()
    }

    fn install(&mut self, signum: i32) -> std::io::Result<()> {
        if self.installed.contains_key(&signum) {
            return Ok(());
        }
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = bump as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = 0;

            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &action, &mut previous) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            self.installed.insert(signum, previous);
        }
        Ok(())
    }

    fn uninstall(&mut self, signum: i32) -> std::io::Result<()> {
        if let Some(previous) = self.installed.remove(&signum) {
            unsafe {
                if libc::sigaction(signum, &previous, std::ptr::null_mut()) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
        }
        Ok(())
    }

    /// Restores every signal this state ever installed a handler for,
    /// regardless of whether it is still watched — the explicit `teardown`
    /// half of spec.md §9's process-wide-state lifecycle note.
    pub fn teardown(&mut self) -> std::io::Result<()> {
        let signums: Vec<i32> = self.installed.keys().copied().collect();
        for signum in signums {
            self.uninstall(signum)?;
        }
        self.lists.clear();
        Ok(())
    }

    /// Installs handlers for any newly-watched signal, then blocks every
    /// other signal for the duration of the backend's OS block. Called
    /// once per dispatch iteration, immediately before blocking.
    pub fn deliver(&mut self) -> std::io::Result<()> {
        let signums: Vec<i32> = self.lists.keys().copied().collect();
        for signum in signums {
            self.install(signum)?;
        }

        unsafe {
            let mut block_set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut block_set);
            let mut previous_mask: libc::sigset_t = std::mem::zeroed();
            if libc::pthread_sigmask(libc::SIG_SETMASK, &block_set, &mut previous_mask) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            self.previous_mask = Some(previous_mask);
        }

        log::trace!("signal::deliver: {} handler(s) installed", self.installed.len());
        Ok(())
    }

    /// Restores the signal mask that was active before `deliver`. Handler
    /// dispositions are left alone — they stay installed until `remove`
    /// drops the last watcher for that signal, or `teardown` runs. Called
    /// once per dispatch iteration, immediately after the backend returns.
    pub fn recalc(&mut self) -> std::io::Result<()> {
        if let Some(previous_mask) = self.previous_mask.take() {
            unsafe {
                if libc::pthread_sigmask(libc::SIG_SETMASK, &previous_mask, std::ptr::null_mut()) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
        }
        Ok(())
    }

    /// After `recalc`: enqueues every event whose signal fired onto `active`,
    /// with `result_mask = SIGNAL` and `ncalls` set to the observed count.
    /// Resets counters and `caught`.
    pub fn process(&mut self, mut activate: impl FnMut(EventId, u32)) {
        if !CAUGHT.swap(false, Ordering::AcqRel) {
            return;
        }

        for (&signum, ids) in &self.lists {
            let idx = signum as usize;
            if idx >= NSIG {
                continue;
            }
            let count = COUNTERS[idx].swap(0, Ordering::AcqRel);
            if count == 0 {
                continue;
            }
            for &id in ids {
                activate(id, count);
            }
        }
    }
}

impl Drop for SignalState {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_track_membership() {
        let mut state = SignalState::new();
        let id = EventId(7);
        state.add(libc::SIGUSR1, id);
        assert!(state.has_signals());
        state.remove(libc::SIGUSR1, id);
        assert!(!state.lists.get(&libc::SIGUSR1).map(|l| !l.is_empty()).unwrap_or(false));
    }

    #[test]
    fn process_is_a_noop_when_nothing_was_caught() {
        let mut state = SignalState::new();
        state.add(libc::SIGUSR1, EventId(1));
        let mut fired = 0;
        state.process(|_, _| fired += 1);
        assert_eq!(fired, 0);
    }
}
