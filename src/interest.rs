//! Bitsets used throughout the reactor: registration intent / delivered
//! result (`Interest`) and queue membership (`Membership`).

use std::ops;

/// Registration intent, and the mask delivered to a callback describing why
/// it fired.
///
/// The same type plays both roles, per the data model: `READ`/`WRITE`/
/// `SIGNAL` are registration intents, `TIMEOUT` is an outcome-only flag, and
/// `PERSIST` means "re-arm automatically after each firing".
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(0b0_0001);
    pub const WRITE: Interest = Interest(0b0_0010);
    pub const SIGNAL: Interest = Interest(0b0_0100);
    pub const TIMEOUT: Interest = Interest(0b0_1000);
    pub const PERSIST: Interest = Interest(0b1_0000);

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Interest) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Interest) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn is_read(self) -> bool {
        self.contains(Interest::READ)
    }

    #[inline]
    pub fn is_write(self) -> bool {
        self.contains(Interest::WRITE)
    }

    #[inline]
    pub fn is_signal(self) -> bool {
        self.contains(Interest::SIGNAL)
    }

    #[inline]
    pub fn is_timeout(self) -> bool {
        self.contains(Interest::TIMEOUT)
    }

    #[inline]
    pub fn is_persist(self) -> bool {
        self.contains(Interest::PERSIST)
    }

    /// `READ`/`WRITE` on one side, `SIGNAL` on the other: mutually exclusive
    /// per the data model's invariants.
    #[inline]
    pub fn is_io(self) -> bool {
        self.intersects(Interest::READ | Interest::WRITE)
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl ops::BitAnd for Interest {
    type Output = Interest;
    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl std::fmt::Debug for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        let mut write_flag = |f: &mut std::fmt::Formatter<'_>, name: &str, set: bool| {
            if set {
                if !first {
                    let _ = write!(f, "|");
                }
                first = false;
                let _ = write!(f, "{name}");
            }
        };
        write!(f, "Interest(")?;
        write_flag(f, "READ", self.is_read());
        write_flag(f, "WRITE", self.is_write());
        write_flag(f, "SIGNAL", self.is_signal());
        write_flag(f, "TIMEOUT", self.is_timeout());
        write_flag(f, "PERSIST", self.is_persist());
        write!(f, ")")
    }
}

/// Which queues a record currently belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Membership(u8);

impl Membership {
    pub const NONE: Membership = Membership(0);
    pub const REGISTERED: Membership = Membership(0b0_00001);
    pub const ACTIVE: Membership = Membership(0b0_00010);
    pub const SIGNAL_LIST: Membership = Membership(0b0_00100);
    pub const TIMEOUT_SET: Membership = Membership(0b0_01000);
    pub const INITIALIZED: Membership = Membership(0b0_10000);
    pub const INTERNAL: Membership = Membership(0b1_00000);

    #[inline]
    pub fn contains(self, other: Membership) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Membership) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Membership) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Membership {
    type Output = Membership;
    fn bitor(self, rhs: Membership) -> Membership {
        Membership(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_combinators() {
        let mut i = Interest::READ | Interest::PERSIST;
        assert!(i.is_read());
        assert!(i.is_persist());
        assert!(!i.is_write());
        i.remove(Interest::PERSIST);
        assert!(!i.is_persist());
        assert!(i.is_read());
    }

    #[test]
    fn membership_roundtrip() {
        let mut m = Membership::NONE;
        m.insert(Membership::REGISTERED);
        m.insert(Membership::ACTIVE);
        assert!(m.contains(Membership::REGISTERED));
        assert!(m.contains(Membership::ACTIVE));
        m.remove(Membership::REGISTERED);
        assert!(!m.contains(Membership::REGISTERED));
        assert!(m.contains(Membership::ACTIVE));
    }

    #[test]
    fn io_and_signal_are_distinguishable() {
        let io = Interest::READ | Interest::WRITE;
        let sig = Interest::SIGNAL;
        assert!(io.is_io());
        assert!(!sig.is_io());
        assert!(sig.is_signal());
    }
}
