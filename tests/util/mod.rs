// Not all functions are used by all tests.
#![allow(dead_code)]

use std::os::unix::io::RawFd;
use std::sync::Once;

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::try_init();
    })
}

/// Creates a connected pair of Unix domain sockets, set non-blocking, for
/// exercising read/write readiness without depending on a `net` module this
/// crate does not provide.
pub fn socketpair() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let res = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(res, 0, "socketpair failed: {}", std::io::Error::last_os_error());

    for &fd in &fds {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        let res = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        assert_eq!(res, 0, "fcntl failed: {}", std::io::Error::last_os_error());
    }

    (fds[0], fds[1])
}

pub fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}
