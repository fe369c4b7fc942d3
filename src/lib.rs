//! `revent`: a portable event-notification reactor.
//!
//! A single-threaded, callback-driven event loop that multiplexes file
//! descriptor readiness, one-shot and periodic timers, and POSIX signals
//! behind a pluggable OS backend (`select` or `poll`), plus a buffered-I/O
//! layer (`ByteBuffer`, `BufferedEvent`) built on top.
//!
//! ```no_run
//! use revent::{Interest, Reactor, LoopFlags};
//! use std::time::Duration;
//!
//! let mut reactor = Reactor::new()?;
//! let id = reactor.timer_set(|_reactor, _fd, _ready, _ncalls| {
//!     println!("fired");
//! });
//! reactor.event_add(id, Some(Duration::from_millis(10)))?;
//! reactor.run_loop(LoopFlags::ONCE)?;
//! # Ok::<(), revent::Error>(())
//! ```
//!
//! See `SPEC_FULL.md` in the repository root for the full design.

#![allow(clippy::needless_doctest_main)]

#[macro_use]
mod macros;

mod backend;
mod buffer;
mod bufferevent;
mod error;
mod event;
mod interest;
mod reactor;
mod signal;
mod slab;
mod timer;

pub use backend::{poll::PollBackend, select::SelectBackend, Backend};
pub use buffer::ByteBuffer;
pub use bufferevent::{BufferedEvent, ErrorFlags, ErrorCallback, ReadCallback, Watermark, WriteCallback};
pub use error::{Error, Result};
pub use event::EventId;
pub use interest::{Interest, Membership};
pub use reactor::{LoopFlags, Reactor, ReactorConfig};

#[cfg(test)]
mod integration_smoke {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reactor_construction_picks_a_backend() {
        let reactor = Reactor::new();
        assert!(reactor.is_ok());
    }

    #[test]
    fn a_timer_fires_within_one_once_iteration() {
        let mut reactor = Reactor::new().unwrap();
        let fired = std::rc::Rc::new(std::cell::RefCell::new(false));
        let fired_cb = fired.clone();
        let id = reactor.timer_set(move |_, _, _, _| {
            *fired_cb.borrow_mut() = true;
        });
        reactor.event_add(id, Some(Duration::from_millis(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        reactor.run_loop(LoopFlags::ONCE).unwrap();
        assert!(*fired.borrow());
    }
}
