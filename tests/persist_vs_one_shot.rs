//! spec.md §8 scenario 6: two READ events on the same fd, one PERSIST.
//! After one firing, the non-PERSIST event is gone; the PERSIST event
//! remains registered and fires again on the next readable tick.

mod util;
use util::{close, init, socketpair};

use revent::{Interest, LoopFlags, Reactor};
use std::cell::RefCell;
use std::io::Write;
use std::os::unix::io::FromRawFd;
use std::rc::Rc;

#[test]
fn persist_event_survives_firing_one_shot_event_does_not() {
    init();

    let (rd, wr) = socketpair();

    let mut reactor = Reactor::new().unwrap();

    let one_shot_fires = Rc::new(RefCell::new(0u32));
    let persist_fires = Rc::new(RefCell::new(0u32));

    let one_shot_count = one_shot_fires.clone();
    let one_shot_id = reactor.event_set(rd, Interest::READ, move |_reactor, _fd, _ready, _ncalls| {
        *one_shot_count.borrow_mut() += 1;
    });

    let persist_count = persist_fires.clone();
    let persist_id = reactor.event_set(rd, Interest::READ | Interest::PERSIST, move |_reactor, _fd, _ready, _ncalls| {
        *persist_count.borrow_mut() += 1;
    });

    reactor.event_add(one_shot_id, None).unwrap();
    reactor.event_add(persist_id, None).unwrap();

    let mut writer = unsafe { std::net::UnixStream::from_raw_fd(wr) };
    writer.write_all(b"x").unwrap();
    std::mem::forget(writer);

    reactor.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(*one_shot_fires.borrow(), 1);
    assert_eq!(*persist_fires.borrow(), 1);

    // The PERSIST event is still registered, so level-triggered readiness
    // (the byte is still unread) fires it again; the one-shot event is
    // gone and must not fire a second time.
    reactor.run_loop(LoopFlags::ONCE).unwrap();

    assert_eq!(*one_shot_fires.borrow(), 1);
    assert_eq!(*persist_fires.borrow(), 2);

    close(rd);
    close(wr);
}
