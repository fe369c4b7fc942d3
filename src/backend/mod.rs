//! Pluggable OS readiness backends (spec.md §4.4).
//!
//! A `Backend` multiplexes fd readiness for the reactor's registered I/O
//! events. It owns no event state beyond what it needs to ask the OS "which
//! of these fds are ready" — the `EventRecord` arena, timer set and signal
//! state all live in `Reactor`. Each dispatch iteration, the reactor:
//!
//! 1. computes the next timeout from the timer set,
//! 2. calls `Backend::dispatch`, which rebuilds whatever internal state has
//!    gone stale since the last call, blocks in the OS primitive, handles
//!    `EINTR` by running the signal subsystem's `deliver`/`process`/`recalc`
//!    sequence, and reports readiness back through the `report` callback.
//!
//! Two backends are provided: [`select::SelectBackend`] (portable, O(fd)
//! per call) and [`poll::PollBackend`] (fewer syscall-side limits, no
//! `FD_SETSIZE` ceiling). `crate::reactor` picks one at construction time,
//! honoring the `EVENT_NOSELECT`/`EVENT_NOPOLL` environment variables per
//! spec.md §4.6.

pub mod poll;
pub mod select;

use crate::event::EventId;
use crate::interest::Interest;
use crate::signal::SignalState;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Reports that `id` fired for the conditions in `ready`, `ncalls` times
/// (always 1 for fd readiness; may be greater for coalesced signal
/// deliveries relayed from `SignalState::process`).
pub type ReportFn<'a> = dyn FnMut(EventId, Interest, u32) + 'a;

/// A pluggable readiness multiplexer.
///
/// Implementors are not required to be `Send`/`Sync`; the reactor that owns
/// one runs on a single thread, per spec.md §2's Non-goals.
pub trait Backend {
    /// A short, stable name for diagnostics (`"select"`, `"poll"`).
    fn name(&self) -> &'static str;

    /// Starts watching `fd` for `interest` (READ/WRITE only; callers never
    /// pass SIGNAL or TIMEOUT here) on behalf of `id`. Multiple ids may
    /// watch the same `fd` at once (e.g. a `BufferedEvent`'s separate read
    /// and write events) — each is reported independently, per its own
    /// `interest`.
    fn add(&mut self, fd: RawFd, interest: Interest, id: EventId) -> io::Result<()>;

    /// Stops `id` from watching `fd`. A no-op if that pair was never added.
    /// Other ids still watching `fd` are unaffected.
    fn del(&mut self, fd: RawFd, id: EventId) -> io::Result<()>;

    /// Blocks for up to `timeout` (or indefinitely if `None`) waiting for
    /// readiness, then reports every ready fd through `report`.
    ///
    /// Must rebuild whatever internal representation it consumes if it has
    /// gone stale since the last call (e.g. after a batch of `add`/`del`),
    /// and must run the signal subsystem around the OS block: install
    /// handlers via `signals.deliver()`, block, then `signals.recalc()` and
    /// `signals.process(..)` before returning — including when the OS call
    /// is interrupted by `EINTR`, which is not an error condition here.
    fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        signals: &mut SignalState,
        report: &mut ReportFn<'_>,
    ) -> io::Result<()>;
}
