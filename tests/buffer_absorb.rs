//! spec.md §8 scenario 4: `evbuffer_add_buffer`'s O(1) fast path when the
//! destination is empty, and the change-callback firing order decided in
//! `SPEC_FULL.md` §9(a) (destination before source).

mod util;
use util::init;

use revent::ByteBuffer;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn absorb_moves_bytes_and_fires_both_callbacks_in_order() {
    init();

    let mut a = ByteBuffer::new();
    let mut b = ByteBuffer::new();
    b.append(b"hello").unwrap();

    let order: Rc<RefCell<Vec<(&'static str, usize, usize)>>> = Rc::new(RefCell::new(Vec::new()));

    let order_a = order.clone();
    a.set_cb(Box::new(move |old, new| order_a.borrow_mut().push(("a", old, new))));
    let order_b = order.clone();
    b.set_cb(Box::new(move |old, new| order_b.borrow_mut().push(("b", old, new))));

    a.absorb(&mut b).unwrap();

    assert_eq!(a.as_slice(), b"hello");
    assert!(b.is_empty());

    let log = order.borrow();
    assert_eq!(log.as_slice(), &[("a", 0, 5), ("b", 5, 0)]);
}
