//! RandomX Flags
//!
//! Advisory switches selecting memory mode and acceleration. No combination
//! of flags changes a digest; they only trade portability for speed.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bitset of RandomX configuration flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u32);

impl Flags {
    /// Portable defaults: light mode, table AES.
    pub const DEFAULT: Self = Self(0);
    /// Back cache and dataset memory with OS large pages.
    pub const LARGE_PAGES: Self = Self(1 << 0);
    /// Use AES-NI for scratchpad fill and hash when the CPU supports it.
    pub const HARD_AES: Self = Self(1 << 1);
    /// Read from a fully materialized dataset instead of the cache.
    pub const FULL_MEM: Self = Self(1 << 2);
    /// Compile programs to native code.
    pub const JIT: Self = Self(1 << 3);
    /// Keep JIT pages W^X.
    pub const SECURE: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::LARGE_PAGES, "LARGE_PAGES"),
        (Self::HARD_AES, "HARD_AES"),
        (Self::FULL_MEM, "FULL_MEM"),
        (Self::JIT, "JIT"),
        (Self::SECURE, "SECURE"),
    ];

    /// Raw bit value.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds flags from raw bits, dropping unknown bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x1F)
    }

    /// True if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags best suited to the running host.
    ///
    /// Only `HARD_AES` is ever detected; large pages and JIT are not
    /// provided by this crate.
    pub fn recommended() -> Self {
        if crate::aes::hardware_available() {
            Self::HARD_AES
        } else {
            Self::DEFAULT
        }
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for Flags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0 & 0x1F)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("DEFAULT");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_query() {
        let flags = Flags::FULL_MEM | Flags::HARD_AES;
        assert!(flags.contains(Flags::FULL_MEM));
        assert!(flags.contains(Flags::HARD_AES));
        assert!(!flags.contains(Flags::JIT));
        assert_eq!(flags.bits(), 0b110);
        assert_eq!(flags & !Flags::HARD_AES, Flags::FULL_MEM);
    }

    #[test]
    fn debug_lists_names() {
        assert_eq!(format!("{:?}", Flags::DEFAULT), "DEFAULT");
        assert_eq!(
            format!("{:?}", Flags::LARGE_PAGES | Flags::SECURE),
            "LARGE_PAGES | SECURE"
        );
    }

    #[test]
    fn truncates_unknown_bits() {
        assert_eq!(Flags::from_bits_truncate(0xFFFF_FFFF).bits(), 0x1F);
    }
}
