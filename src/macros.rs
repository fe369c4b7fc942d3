//! Small FFI and logging helpers shared by the backend implementations.

#![allow(unused_macros)]

/// Call a raw libc function, translating a `-1` return into
/// `io::Error::last_os_error()`.
#[macro_export]
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
