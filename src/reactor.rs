//! The reactor core (spec.md §4.6): registration surface, dispatch loop,
//! and backend selection.
//!
//! Grounded on `src/deprecated/event_loop.rs`'s `EventLoopBuilder`/`Config`
//! shape for the ambient configuration layer, generalized from its
//! notify-channel-and-timer-wheel design to the arena/timer-set/signal-state
//! model built up in `event.rs`, `timer.rs` and `signal.rs`.

use crate::backend::{poll::PollBackend, select::SelectBackend, Backend};
use crate::error::{Error, Result};
use crate::event::{Callback, EventId, EventRecord};
use crate::interest::{Interest, Membership};
use crate::signal::SignalState;
use crate::slab::Slab;
use crate::timer::TimerSet;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Flags accepted by [`Reactor::run_loop`].
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct LoopFlags(u8);

impl LoopFlags {
    pub const NONE: LoopFlags = LoopFlags(0);
    /// Run exactly one dispatch iteration, then return.
    pub const ONCE: LoopFlags = LoopFlags(0b01);
    /// Never block in the backend, even if nothing is immediately ready.
    pub const NONBLOCK: LoopFlags = LoopFlags(0b10);

    fn contains(self, other: LoopFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LoopFlags {
    type Output = LoopFlags;
    fn bitor(self, rhs: LoopFlags) -> LoopFlags {
        LoopFlags(self.0 | rhs.0)
    }
}

/// Ambient sizing knobs, separate from functional scope: preallocation
/// hints only, mirroring `EventLoopBuilder`'s non-functional configuration
/// surface.
#[derive(Clone, Debug)]
struct Config {
    event_capacity: usize,
    active_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            event_capacity: 1_024,
            active_queue_capacity: 256,
        }
    }
}

/// Builds a [`Reactor`] with non-default sizing hints.
#[derive(Clone, Debug, Default)]
pub struct ReactorConfig {
    config: Config,
}

impl ReactorConfig {
    pub fn new() -> ReactorConfig {
        ReactorConfig::default()
    }

    /// Preallocation hint for the event-record arena. Default 1024.
    pub fn event_capacity(&mut self, capacity: usize) -> &mut Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Preallocation hint for the active queue. Default 256.
    pub fn active_queue_capacity(&mut self, capacity: usize) -> &mut Self {
        self.config.active_queue_capacity = capacity;
        self
    }

    pub fn build(&self) -> Result<Reactor> {
        Reactor::with_config(self.config.clone())
    }
}

/// One active-queue entry.
struct ActiveEntry {
    id: EventId,
}

/// The event-notification reactor. Single-threaded: all registration,
/// dispatch and callback invocation happens on the thread that owns it, per
/// spec.md §5's concurrency model.
pub struct Reactor {
    records: Slab<EventRecord>,
    registered: Vec<EventId>,
    timers: TimerSet,
    signals: SignalState,
    active: VecDeque<ActiveEntry>,
    backend: Box<dyn Backend>,
    exit_deadline: Option<Instant>,
    last_now: Instant,
}

impl Reactor {
    pub fn new() -> Result<Reactor> {
        Reactor::with_config(Config::default())
    }

    fn with_config(config: Config) -> Result<Reactor> {
        let backend = select_backend()?;
        log::debug!("reactor: selected backend {:?}", backend.name());

        Ok(Reactor {
            records: Slab::with_capacity(config.event_capacity),
            registered: Vec::with_capacity(config.event_capacity),
            timers: TimerSet::new(),
            signals: SignalState::new(),
            active: VecDeque::with_capacity(config.active_queue_capacity),
            backend,
            exit_deadline: None,
            last_now: Instant::now(),
        })
    }

    /// Initializes a record: stores `fd`, `interest`, and `cb`, with every
    /// membership bit clear except `INITIALIZED`. Does not arm it — call
    /// [`Reactor::event_add`] next.
    pub fn event_set(
        &mut self,
        fd: RawFd,
        interest: Interest,
        cb: impl FnMut(&mut Reactor, RawFd, Interest, &mut u32) + 'static,
    ) -> EventId {
        let callback: Callback = Box::new(cb);
        let record = EventRecord::new(fd, interest, callback);
        EventId(self.records.insert(record))
    }

    /// `timer_set` alias: a pure-timer event (`fd = -1`).
    pub fn timer_set(
        &mut self,
        cb: impl FnMut(&mut Reactor, RawFd, Interest, &mut u32) + 'static,
    ) -> EventId {
        self.event_set(-1, Interest::NONE, cb)
    }

    /// `signal_set` alias: `interest` gains `SIGNAL | PERSIST` automatically.
    pub fn signal_set(
        &mut self,
        signum: i32,
        cb: impl FnMut(&mut Reactor, RawFd, Interest, &mut u32) + 'static,
    ) -> EventId {
        self.event_set(signum, Interest::SIGNAL | Interest::PERSIST, cb)
    }

    /// Idempotent arming (spec.md §4.6 `event_add`).
    pub fn event_add(&mut self, id: EventId, timeout: Option<Duration>) -> Result<()> {
        if let Some(tv) = timeout {
            let deadline = Instant::now() + tv;
            if let Some(old_key) = self.records.get(id.0).and_then(|r| r.deadline) {
                self.timers.remove(old_key);
            }
            let key = self.timers.insert(deadline, id);
            let record = self.record_mut(id)?;
            record.deadline = Some(key);
            record.membership.insert(Membership::TIMEOUT_SET);
        }

        let (fd, interest, membership) = {
            let record = self.record_mut(id)?;
            (record.fd, record.interest, record.membership)
        };

        if interest.is_io() && !membership.contains(Membership::REGISTERED) {
            self.backend
                .add(fd, interest, id)
                .map_err(Error::BackendError)?;
            self.registered.push(id);
            self.record_mut(id)?.membership.insert(Membership::REGISTERED);
        }

        if interest.is_signal() && !membership.contains(Membership::SIGNAL_LIST) {
            self.signals.add(fd, id);
            self.record_mut(id)?.membership.insert(Membership::SIGNAL_LIST);
        }

        Ok(())
    }

    /// `timer_add` alias.
    pub fn timer_add(&mut self, id: EventId, timeout: Duration) -> Result<()> {
        self.event_add(id, Some(timeout))
    }

    /// `signal_add` alias.
    pub fn signal_add(&mut self, id: EventId) -> Result<()> {
        self.event_add(id, None)
    }

    /// Removes from every queue it is in (spec.md §4.6 `event_del`). A
    /// no-op on bits that are already clear.
    pub fn event_del(&mut self, id: EventId) -> Result<()> {
        let (fd, membership, deadline) = {
            let record = self.record_mut(id)?;
            (record.fd, record.membership, record.deadline)
        };

        if let Some(key) = deadline {
            self.timers.remove(key);
            self.record_mut(id)?.deadline = None;
            self.record_mut(id)?.membership.remove(Membership::TIMEOUT_SET);
        }

        if membership.contains(Membership::REGISTERED) {
            self.backend.del(fd, id).map_err(Error::BackendError)?;
            self.registered.retain(|&existing| existing != id);
            self.record_mut(id)?.membership.remove(Membership::REGISTERED);
        }

        if membership.contains(Membership::SIGNAL_LIST) {
            self.signals.remove(fd, id);
            self.record_mut(id)?.membership.remove(Membership::SIGNAL_LIST);
        }

        if membership.contains(Membership::ACTIVE) {
            self.active.retain(|entry| entry.id != id);
            self.record_mut(id)?.membership.remove(Membership::ACTIVE);
        }

        Ok(())
    }

    /// `timer_del` alias.
    pub fn timer_del(&mut self, id: EventId) -> Result<()> {
        self.event_del(id)
    }

    /// `signal_del` alias.
    pub fn signal_del(&mut self, id: EventId) -> Result<()> {
        self.event_del(id)
    }

    /// Appends to the active queue (if not already present), OR-ing
    /// `mask` into `result_mask` and setting `ncalls` — idempotent except
    /// for the OR-accumulation, per spec.md §4.6.
    ///
    /// Callers may invoke this from outside the dispatch loop (Open
    /// Question (b), decided in `SPEC_FULL.md` §9): the active queue is
    /// ordinary reactor state, not reentered concurrently, since the
    /// reactor is single-threaded.
    pub fn event_active(&mut self, id: EventId, mask: Interest, ncalls: u32) {
        let already_active = match self.records.get_mut(id.0) {
            Some(record) => {
                record.result_mask |= mask;
                record.ncalls = record.ncalls.max(ncalls);
                record.membership.contains(Membership::ACTIVE)
            }
            None => return,
        };

        if !already_active {
            self.records.get_mut(id.0).unwrap().membership.insert(Membership::ACTIVE);
            self.active.push_back(ActiveEntry { id });
        }
    }

    /// The result mask accumulated for `id` since it was last dispatched.
    pub fn event_pending(&self, id: EventId) -> Interest {
        self.records.get(id.0).map_or(Interest::NONE, |r| r.result_mask)
    }

    /// Removes `id` from the arena entirely. Debug-asserts it carries no
    /// membership bits — the caller must `event_del` first, matching
    /// spec.md §7's programming-error contract.
    pub fn event_free(&mut self, id: EventId) {
        if let Some(record) = self.records.get(id.0) {
            debug_assert!(
                record.membership == Membership::INITIALIZED,
                "event_free called on a record still registered/active/pending"
            );
        }
        if self.records.contains(id.0) {
            self.records.remove(id.0);
        }
    }

    /// Schedules loop termination after `timeout` (or immediately if
    /// `None`).
    pub fn loop_exit(&mut self, timeout: Option<Duration>) {
        self.exit_deadline = Some(Instant::now() + timeout.unwrap_or_default());
    }

    /// One dispatch iteration (spec.md §4.6's numbered steps). Returns 0 on
    /// a clean iteration, 1 if nothing is registered (spec.md §6's exit
    /// codes) — independent of how many callbacks fired.
    pub fn dispatch(&mut self) -> Result<i32> {
        self.dispatch_with_flags(LoopFlags::NONE)
    }

    /// Moves every timer with a deadline `<= now` from the timer set onto
    /// `queue`, in deadline order, without disturbing whatever is already
    /// queued. Shared by the pre-dispatch and post-dispatch harvest points
    /// in `dispatch_with_flags`.
    fn harvest_expired_timers(&mut self, now: Instant, queue: &mut VecDeque<ActiveEntry>) {
        while let Some((_, id)) = self.timers.pop_expired(now) {
            if let Some(record) = self.records.get_mut(id.0) {
                record.membership.remove(Membership::TIMEOUT_SET);
                record.deadline = None;
                record.result_mask |= Interest::TIMEOUT;
                record.ncalls = record.ncalls.max(1);
                if !record.membership.contains(Membership::ACTIVE) {
                    record.membership.insert(Membership::ACTIVE);
                    queue.push_back(ActiveEntry { id });
                }
            }
        }
    }

    fn dispatch_with_flags(&mut self, flags: LoopFlags) -> Result<i32> {
        if self.active.is_empty()
            && self.registered.is_empty()
            && self.timers.is_empty()
            && !self.signals.has_signals()
        {
            log::debug!("reactor: no events registered");
            return Ok(1);
        }

        let now = Instant::now();
        if now < self.last_now {
            let backward = self.last_now - now;
            self.timers.shift_all(backward);
            log::warn!("reactor: wallclock moved backward by {backward:?}, timers corrected");
        }
        self.last_now = now;

        // Timers already expired at the top of this iteration take
        // priority over whatever the backend reports below (spec.md §5's
        // ordering guarantee), and forcing a non-blocking poll once any are
        // queued avoids blocking when there is nothing left to wait for.
        let mut pre_dispatch = VecDeque::new();
        self.harvest_expired_timers(now, &mut pre_dispatch);
        pre_dispatch.append(&mut self.active);
        self.active = pre_dispatch;

        let timeout = if !self.active.is_empty() || flags.contains(LoopFlags::NONBLOCK) {
            Some(Duration::ZERO)
        } else {
            self.timers.min_deadline().map(|deadline| deadline.saturating_duration_since(now))
        };

        let records = &mut self.records;
        let active = &mut self.active;
        let mut report = |id: EventId, ready: Interest, ncalls: u32| {
            if let Some(record) = records.get_mut(id.0) {
                record.result_mask |= ready;
                record.ncalls = record.ncalls.max(ncalls.max(1));
                if !record.membership.contains(Membership::ACTIVE) {
                    record.membership.insert(Membership::ACTIVE);
                    active.push_back(ActiveEntry { id });
                }
            }
        };
        self.backend
            .dispatch(timeout, &mut self.signals, &mut report)
            .map_err(Error::BackendError)?;

        // Timers that expired during the blocking wait must still run
        // ahead of the fd/signal events `report` just queued above, so
        // splice them in at the front rather than appending.
        let now = Instant::now();
        let mut post_dispatch = VecDeque::new();
        self.harvest_expired_timers(now, &mut post_dispatch);
        post_dispatch.append(&mut self.active);
        self.active = post_dispatch;

        while let Some(entry) = self.active.pop_front() {
            let id = entry.id;
            let (persist, mut ncalls) = match self.records.get_mut(id.0) {
                Some(record) => {
                    record.membership.remove(Membership::ACTIVE);
                    (record.interest.is_persist(), record.ncalls.max(1))
                }
                None => continue,
            };

            if !persist {
                self.event_del(id)?;
            }

            let (fd, result_mask) = match self.records.get(id.0) {
                Some(record) => (record.fd, record.result_mask),
                None => continue,
            };

            // Take the callback out of the arena before invoking it: the
            // callback receives `&mut Reactor` (so it can re-arm itself or
            // other events, per `event.rs`'s `Callback` doc), which would
            // otherwise alias the `&mut EventRecord` borrowed from
            // `self.records` to reach it. Reinserted unless the callback
            // itself freed the record.
            let mut callback = match self.records.get_mut(id.0) {
                Some(record) => std::mem::replace(&mut record.callback, Box::new(|_, _, _, _| {})),
                None => continue,
            };

            while ncalls > 0 {
                let mut remaining = ncalls;
                callback(self, fd, result_mask, &mut remaining);
                if remaining >= ncalls {
                    break;
                }
                ncalls = remaining;
            }

            if let Some(record) = self.records.get_mut(id.0) {
                record.callback = callback;
                record.result_mask = Interest::NONE;
                record.ncalls = 0;
            }
        }

        Ok(0)
    }

    /// Runs iterations until `exit_deadline` is reached, `ONCE` is set, or
    /// (absent both) forever. Returns the status of the last iteration run:
    /// 0 on a clean exit, 1 if nothing was registered to wait on.
    pub fn run_loop(&mut self, flags: LoopFlags) -> Result<i32> {
        loop {
            let status = self.dispatch_with_flags(flags)?;
            if status != 0 {
                return Ok(status);
            }

            if flags.contains(LoopFlags::ONCE) {
                return Ok(0);
            }
            if let Some(deadline) = self.exit_deadline {
                if Instant::now() >= deadline {
                    return Ok(0);
                }
            }
        }
    }

    fn record_mut(&mut self, id: EventId) -> Result<&mut EventRecord> {
        self.records.get_mut(id.0).ok_or(Error::AllocFailed)
    }
}

/// Picks a backend, honoring `EVENT_NOSELECT`/`EVENT_NOPOLL` (spec.md §4.6,
/// §6): `poll` is preferred when available, falling back to `select`.
fn select_backend() -> Result<Box<dyn Backend>> {
    let no_poll = std::env::var_os("EVENT_NOPOLL").is_some();
    let no_select = std::env::var_os("EVENT_NOSELECT").is_some();

    if !no_poll {
        return Ok(Box::new(PollBackend::new().map_err(Error::BackendError)?));
    }
    if !no_select {
        return Ok(Box::new(SelectBackend::new().map_err(Error::BackendError)?));
    }
    Err(Error::BackendError(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "both EVENT_NOPOLL and EVENT_NOSELECT set: no backend available",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn event_add_then_del_restores_membership() {
        let mut reactor = Reactor::new().unwrap();
        let id = reactor.timer_set(|_, _, _, _| {});
        reactor.event_add(id, Some(Duration::from_secs(60))).unwrap();
        reactor.event_del(id).unwrap();
        let record = reactor.records.get(id.0).unwrap();
        assert_eq!(record.membership, Membership::INITIALIZED);
    }

    #[test]
    fn event_add_twice_with_different_timeout_replaces_not_duplicates() {
        let mut reactor = Reactor::new().unwrap();
        let id = reactor.timer_set(|_, _, _, _| {});
        reactor.event_add(id, Some(Duration::from_secs(60))).unwrap();
        reactor.event_add(id, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(reactor.timers.len(), 1);
    }

    #[test]
    fn timer_only_loop_fires_once_and_stops() {
        let mut reactor = Reactor::new().unwrap();
        let fired = Rc::new(RefCell::new(0));
        let fired_cb = fired.clone();
        let id = reactor.timer_set(move |_, _, _, _| {
            *fired_cb.borrow_mut() += 1;
        });
        reactor.event_add(id, Some(Duration::from_millis(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        reactor.run_loop(LoopFlags::ONCE).unwrap();
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn event_del_on_active_event_cancels_pending_callback() {
        let mut reactor = Reactor::new().unwrap();
        let fired = Rc::new(RefCell::new(0));
        let fired_cb = fired.clone();
        let id = reactor.timer_set(move |_, _, _, _| {
            *fired_cb.borrow_mut() += 1;
        });
        reactor.event_active(id, Interest::TIMEOUT, 1);
        reactor.event_del(id).unwrap();
        reactor.run_loop(LoopFlags::ONCE).unwrap();
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn dispatch_returns_zero_regardless_of_how_many_callbacks_fired() {
        let mut reactor = Reactor::new().unwrap();
        let id = reactor.timer_set(|_, _, _, _| {});
        reactor.event_add(id, Some(Duration::from_millis(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let rc = reactor.run_loop(LoopFlags::ONCE).unwrap();
        assert_eq!(rc, 0, "return code is a status, not a dispatched-callback count");
    }

    #[test]
    fn run_loop_returns_one_when_nothing_is_registered() {
        let mut reactor = Reactor::new().unwrap();
        let rc = reactor.run_loop(LoopFlags::ONCE).unwrap();
        assert_eq!(rc, 1);
    }
}
