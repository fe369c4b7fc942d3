//! spec.md §8 scenario 1: a non-PERSIST timer fires exactly once and is
//! deregistered afterward.

mod util;
use util::init;

use revent::{Interest, LoopFlags, Reactor};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn timer_only_loop_fires_once_with_timeout_mask() {
    init();

    let mut reactor = Reactor::new().unwrap();
    let fire_count = Rc::new(RefCell::new(0u32));
    let seen_mask = Rc::new(RefCell::new(Interest::NONE));

    let count = fire_count.clone();
    let mask = seen_mask.clone();
    let id = reactor.timer_set(move |_reactor, _fd, ready, _ncalls| {
        *count.borrow_mut() += 1;
        *mask.borrow_mut() = ready;
    });

    reactor.event_add(id, Some(Duration::from_millis(50))).unwrap();

    // Give the deadline a chance to actually elapse before the single
    // dispatch iteration below computes its wait time.
    std::thread::sleep(Duration::from_millis(60));

    let rc = reactor.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(rc, 0);
    assert_eq!(*fire_count.borrow(), 1);
    assert!(seen_mask.borrow().is_timeout());
    assert!(!reactor.event_pending(id).is_timeout());
}
