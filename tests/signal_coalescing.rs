//! spec.md §8 scenario 5: signals raised multiple times before a dispatch
//! iteration are coalesced into a single callback firing carrying the
//! observed count, per `SignalState::process`.

mod util;
use util::init;

use revent::{LoopFlags, Reactor};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn signals_raised_before_dispatch_coalesce_into_one_firing() {
    init();

    let mut reactor = Reactor::new().unwrap();

    let fire_count = Rc::new(RefCell::new(0u32));
    let observed_ncalls = Rc::new(RefCell::new(0u32));

    let fires = fire_count.clone();
    let ncalls_seen = observed_ncalls.clone();
    let id = reactor.signal_set(libc::SIGUSR1, move |_reactor, _fd, ready, ncalls| {
        *fires.borrow_mut() += 1;
        *ncalls_seen.borrow_mut() = *ncalls;
        assert!(ready.is_signal());
    });
    reactor.signal_add(id).unwrap();

    // A signal's handler is only installed the first time `deliver` runs
    // (see `SignalState::install`); prime it with a throwaway, non-blocking
    // iteration so the raises below land on `bump`, not the pre-reactor
    // disposition (`SIG_DFL`, which would terminate the process).
    reactor.run_loop(LoopFlags::ONCE | LoopFlags::NONBLOCK).unwrap();
    assert_eq!(*fire_count.borrow(), 0);

    unsafe {
        libc::raise(libc::SIGUSR1);
        libc::raise(libc::SIGUSR1);
        libc::raise(libc::SIGUSR1);
    }

    reactor.run_loop(LoopFlags::ONCE | LoopFlags::NONBLOCK).unwrap();

    assert_eq!(*fire_count.borrow(), 1);
    assert_eq!(*observed_ncalls.borrow(), 3);

    reactor.signal_del(id).unwrap();
}
