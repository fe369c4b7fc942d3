//! Buffered event (spec.md §4.7): couples an input and output [`ByteBuffer`]
//! to a descriptor via a read event and a write event, with watermark-gated
//! back-pressure.
//!
//! Grounded on `src/deprecated/event_loop.rs`'s `Handler`-takes-`&mut
//! EventLoop` wiring (mirrored here by `Callback` taking `&mut Reactor`) and
//! on `examples/original_source/evbuffer.c`'s `bufferevent_readcb`/
//! `bufferevent_writecb`/`bufferevent_read_pressure_cb` trio.

use crate::buffer::ByteBuffer;
use crate::error::Result;
use crate::event::EventId;
use crate::interest::Interest;
use crate::reactor::Reactor;
use std::cell::{Cell, RefCell};
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// A low/high watermark pair. `low = 0` means "no low watermark"; `high = 0`
/// means "no back-pressure ceiling".
#[derive(Copy, Clone, Debug, Default)]
pub struct Watermark {
    pub low: usize,
    pub high: usize,
}

impl Watermark {
    pub fn new(low: usize, high: usize) -> Watermark {
        Watermark { low, high }
    }
}

/// Bitset delivered to the error callback: `{READ|WRITE, EOF, ERROR,
/// TIMEOUT}` per spec.md §4.7.
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    pub const NONE: ErrorFlags = ErrorFlags(0);
    pub const READ: ErrorFlags = ErrorFlags(0b0_0001);
    pub const WRITE: ErrorFlags = ErrorFlags(0b0_0010);
    pub const EOF: ErrorFlags = ErrorFlags(0b0_0100);
    pub const ERROR: ErrorFlags = ErrorFlags(0b0_1000);
    pub const TIMEOUT: ErrorFlags = ErrorFlags(0b1_0000);

    fn insert(&mut self, other: ErrorFlags) {
        self.0 |= other.0;
    }

    pub fn contains(self, other: ErrorFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ErrorFlags {
    type Output = ErrorFlags;
    fn bitor(self, rhs: ErrorFlags) -> ErrorFlags {
        ErrorFlags(self.0 | rhs.0)
    }
}

/// Invoked once the user-visible read callback conditions are met, with the
/// owning reactor (to re-arm further events if desired) and the input
/// buffer to drain.
pub type ReadCallback = Box<dyn FnMut(&mut Reactor, &mut ByteBuffer)>;
/// Invoked once the output buffer drains to or below `wm_write.low`.
pub type WriteCallback = Box<dyn FnMut(&mut Reactor)>;
/// Invoked on error/EOF/timeout in either direction.
pub type ErrorCallback = Box<dyn FnMut(&mut Reactor, ErrorFlags)>;

/// Reads and writes a raw descriptor via `libc::read`/`libc::write`,
/// translating `-1` through the `syscall!` macro like every other FFI call
/// site in this crate.
struct RawIo(RawFd);

impl io::Read for RawIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        crate::syscall!(read(self.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len())).map(|n| n as usize)
    }
}

impl io::Write for RawIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        crate::syscall!(write(self.0, buf.as_ptr() as *const libc::c_void, buf.len())).map(|n| n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// State shared between the public `BufferedEvent` handle and the internal
/// read/write callbacks registered with the reactor.
struct Shared {
    fd: RawFd,
    input: ByteBuffer,
    output: ByteBuffer,
    wm_read: Watermark,
    wm_write: Watermark,
    read_cb: Option<ReadCallback>,
    write_cb: Option<WriteCallback>,
    error_cb: Option<ErrorCallback>,
    timeout_read: Option<Duration>,
    timeout_write: Option<Duration>,
    /// Populated once `BufferedEvent::new` has registered both events —
    /// needed here (rather than only on `BufferedEvent`) so the internal
    /// callbacks, which only capture `Rc<RefCell<Shared>>`, can re-arm
    /// themselves after each firing (spec.md §4.6: a non-`PERSIST` event is
    /// deregistered before its callback runs).
    read_id: Option<EventId>,
    /// Mirrors `read_id`: the internal write callback needs it to re-arm
    /// after a short write.
    write_id: Option<EventId>,
    /// Set while back-pressure has deregistered the read event. Cleared by
    /// the pressure callback once `input.len()` drops back under
    /// `wm_read.high`; actual re-arming happens the next time
    /// [`BufferedEvent::service`] runs, since a `ByteBuffer` change
    /// callback has no reactor access of its own (see its module docs).
    under_pressure: Rc<Cell<bool>>,
}

/// Couples a descriptor's input/output buffers to reactor-driven read and
/// write events, per spec.md §4.7.
pub struct BufferedEvent {
    shared: Rc<RefCell<Shared>>,
    read_id: EventId,
    write_id: EventId,
}

impl BufferedEvent {
    pub fn new(
        reactor: &mut Reactor,
        fd: RawFd,
        read_cb: Option<ReadCallback>,
        write_cb: Option<WriteCallback>,
        error_cb: Option<ErrorCallback>,
    ) -> BufferedEvent {
        let shared = Rc::new(RefCell::new(Shared {
            fd,
            input: ByteBuffer::new(),
            output: ByteBuffer::new(),
            wm_read: Watermark::default(),
            wm_write: Watermark::default(),
            read_cb,
            write_cb,
            error_cb,
            timeout_read: None,
            timeout_write: None,
            read_id: None,
            write_id: None,
            under_pressure: Rc::new(Cell::new(false)),
        }));

        let read_shared = shared.clone();
        let read_id = reactor.event_set(fd, Interest::READ, move |reactor, fd, ready, _| {
            on_readable(reactor, fd, ready, &read_shared);
        });

        let write_shared = shared.clone();
        let write_id = reactor.event_set(fd, Interest::WRITE, move |reactor, fd, ready, _| {
            on_writable(reactor, fd, ready, &write_shared);
        });

        {
            let mut s = shared.borrow_mut();
            s.read_id = Some(read_id);
            s.write_id = Some(write_id);
        }

        BufferedEvent { shared, read_id, write_id }
    }

    /// Per-direction timeouts applied on every (re-)arm, per spec.md §4.7.
    pub fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) {
        let mut s = self.shared.borrow_mut();
        s.timeout_read = read;
        s.timeout_write = write;
    }

    pub fn set_watermark_read(&mut self, wm: Watermark) {
        self.shared.borrow_mut().wm_read = wm;
    }

    pub fn set_watermark_write(&mut self, wm: Watermark) {
        self.shared.borrow_mut().wm_write = wm;
    }

    /// Arms the read event; call once after construction to start reading.
    pub fn start(&mut self, reactor: &mut Reactor) -> Result<()> {
        let timeout = self.shared.borrow().timeout_read;
        reactor.event_add(self.read_id, timeout)
    }

    pub fn disable_read(&mut self, reactor: &mut Reactor) -> Result<()> {
        reactor.event_del(self.read_id)
    }

    pub fn disable_write(&mut self, reactor: &mut Reactor) -> Result<()> {
        reactor.event_del(self.write_id)
    }

    /// Appends `data` to the output buffer and arms the write event if not
    /// already pending, per spec.md §4.7's write path.
    pub fn write(&mut self, reactor: &mut Reactor, data: &[u8]) -> Result<()> {
        let timeout = {
            let mut s = self.shared.borrow_mut();
            s.output.append(data).map_err(crate::error::Error::IoError)?;
            s.timeout_write
        };
        reactor.event_add(self.write_id, timeout)
    }

    pub fn input_len(&self) -> usize {
        self.shared.borrow().input.len()
    }

    pub fn output_len(&self) -> usize {
        self.shared.borrow().output.len()
    }

    /// Re-arms the read event if back-pressure has released since it last
    /// fired. Cheap to call opportunistically (e.g. once per dispatch
    /// iteration); a no-op unless the pressure callback actually cleared
    /// `under_pressure`.
    pub fn service(&mut self, reactor: &mut Reactor) -> Result<()> {
        let released = {
            let s = self.shared.borrow();
            !s.under_pressure.get()
        };
        if released {
            let timeout = self.shared.borrow().timeout_read;
            reactor.event_add(self.read_id, timeout)?;
        }
        Ok(())
    }
}

fn on_readable(reactor: &mut Reactor, fd: RawFd, ready: Interest, shared: &Rc<RefCell<Shared>>) {
    if ready.is_timeout() && !ready.is_read() {
        fire_error(reactor, shared, ErrorFlags::READ | ErrorFlags::TIMEOUT);
        return;
    }

    let mut io = RawIo(fd);
    let read_result = shared.borrow_mut().input.read_from(&mut io, usize::MAX);

    match read_result {
        Ok(0) => {
            fire_error(reactor, shared, ErrorFlags::READ | ErrorFlags::EOF);
            return;
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
            rearm_read(reactor, shared);
            return;
        }
        Err(_) => {
            fire_error(reactor, shared, ErrorFlags::READ | ErrorFlags::ERROR);
            return;
        }
        Ok(_) => {}
    }

    rearm_read(reactor, shared);

    let (len, wm_read) = {
        let s = shared.borrow();
        (s.input.len(), s.wm_read)
    };

    if wm_read.low != 0 && len < wm_read.low {
        return;
    }

    if wm_read.high != 0 && len > wm_read.high {
        apply_back_pressure(reactor, shared);
        return;
    }

    invoke_read_cb(reactor, shared);
}

fn rearm_read(reactor: &mut Reactor, shared: &Rc<RefCell<Shared>>) {
    if shared.borrow().under_pressure.get() {
        return;
    }
    let (read_id, timeout) = {
        let s = shared.borrow();
        (s.read_id, s.timeout_read)
    };
    if let Some(read_id) = read_id {
        let _ = reactor.event_add(read_id, timeout);
    }
}

fn invoke_read_cb(reactor: &mut Reactor, shared: &Rc<RefCell<Shared>>) {
    let cb = shared.borrow_mut().read_cb.take();
    if let Some(mut cb) = cb {
        {
            let mut s = shared.borrow_mut();
            cb(reactor, &mut s.input);
        }
        shared.borrow_mut().read_cb = Some(cb);
    }
}

fn on_writable(reactor: &mut Reactor, fd: RawFd, ready: Interest, shared: &Rc<RefCell<Shared>>) {
    if ready.is_timeout() && !ready.is_write() {
        fire_error(reactor, shared, ErrorFlags::WRITE | ErrorFlags::TIMEOUT);
        return;
    }

    let has_data = shared.borrow().output.len() > 0;
    if has_data {
        let mut io = RawIo(fd);
        let write_result = shared.borrow_mut().output.write_to(&mut io);
        match write_result {
            Ok(0) if shared.borrow().output.len() > 0 => {
                fire_error(reactor, shared, ErrorFlags::WRITE | ErrorFlags::EOF);
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => {
                fire_error(reactor, shared, ErrorFlags::WRITE | ErrorFlags::ERROR);
                return;
            }
            _ => {}
        }
    }

    let (remaining, wm_low, write_id, timeout_write) = {
        let s = shared.borrow();
        (s.output.len(), s.wm_write.low, s.write_id, s.timeout_write)
    };

    if remaining > 0 {
        // Short write: re-arm so the rest drains on the next iteration.
        if let Some(write_id) = write_id {
            let _ = reactor.event_add(write_id, timeout_write);
        }
    }

    if remaining <= wm_low {
        let cb = shared.borrow_mut().write_cb.take();
        if let Some(mut cb) = cb {
            cb(reactor);
            shared.borrow_mut().write_cb = Some(cb);
        }
    }
}

/// Deregisters the read event and installs an input-buffer change callback
/// that clears `under_pressure` once the consumer has drained below the
/// high watermark — spec.md §4.7's back-pressure mechanism, grounded on
/// `bufferevent_read_pressure_cb`. The actual re-arm happens in
/// `BufferedEvent::service`, since a `ByteBuffer` change callback has no
/// reactor access (by design — see `buffer.rs`).
fn apply_back_pressure(reactor: &mut Reactor, shared: &Rc<RefCell<Shared>>) {
    let read_id = shared.borrow().read_id;
    if let Some(read_id) = read_id {
        let _ = reactor.event_del(read_id);
    }
    shared.borrow().under_pressure.set(true);

    let under_pressure = shared.borrow().under_pressure.clone();
    let wm_read = shared.borrow().wm_read;
    shared.borrow_mut().input.set_cb(Box::new(move |_old, new| {
        if wm_read.high == 0 || new < wm_read.high {
            under_pressure.set(false);
        }
    }));
}

fn fire_error(reactor: &mut Reactor, shared: &Rc<RefCell<Shared>>, flags: ErrorFlags) {
    let cb = shared.borrow_mut().error_cb.take();
    if let Some(mut cb) = cb {
        cb(reactor, flags);
        shared.borrow_mut().error_cb = Some(cb);
    }
}
