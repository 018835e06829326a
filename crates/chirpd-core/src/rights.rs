//! Rights bitmask and its single-character text encoding.
//!
//! Ordinary rights gate operations on existing files and directories. The
//! RESERVE right carries a nested sub-mask describing the rights a subject
//! may grant itself on subtrees it creates; sub-bits are only meaningful
//! alongside RESERVE.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use chirpd_vfs::OpenFlags;

/// A set of access rights, stored as a bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rights(u32);

impl Rights {
    pub const NONE: Rights = Rights(0);

    pub const READ: Rights = Rights(1 << 0);
    pub const WRITE: Rights = Rights(1 << 1);
    pub const LIST: Rights = Rights(1 << 2);
    pub const DELETE: Rights = Rights(1 << 3);
    pub const PUT: Rights = Rights(1 << 4);
    pub const ADMIN: Rights = Rights(1 << 5);
    pub const EXECUTE: Rights = Rights(1 << 6);
    pub const RESERVE: Rights = Rights(1 << 7);

    pub const RESERVE_READ: Rights = Rights(1 << 8);
    pub const RESERVE_WRITE: Rights = Rights(1 << 9);
    pub const RESERVE_LIST: Rights = Rights(1 << 10);
    pub const RESERVE_DELETE: Rights = Rights(1 << 11);
    pub const RESERVE_PUT: Rights = Rights(1 << 12);
    pub const RESERVE_RESERVE: Rights = Rights(1 << 13);
    pub const RESERVE_ADMIN: Rights = Rights(1 << 14);
    pub const RESERVE_EXECUTE: Rights = Rights(1 << 15);

    /// The default grant for a freshly initialized root directory, and the
    /// compatibility fallback when a RESERVE entry carries no sub-rights.
    pub const FULL: Rights = Rights(
        Self::READ.0 | Self::WRITE.0 | Self::LIST.0 | Self::DELETE.0 | Self::ADMIN.0,
    );

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is present in `self`.
    pub fn contains(self, other: Rights) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `self` and `other` share at least one bit.
    pub fn intersects(self, other: Rights) -> bool {
        self.0 & other.0 != 0
    }

    /// Removes the bits of `other` from `self`.
    pub fn without(self, other: Rights) -> Rights {
        Rights(self.0 & !other.0)
    }

    /// Serializes to the text grammar: one character per right in the fixed
    /// order `r w l d p a x`, then `v(...)` holding the sub-rights in order
    /// `r w l d p v a x`, or `n` for the empty mask.
    pub fn to_text(self) -> String {
        let mut text = String::new();
        if self.contains(Self::READ) {
            text.push('r');
        }
        if self.contains(Self::WRITE) {
            text.push('w');
        }
        if self.contains(Self::LIST) {
            text.push('l');
        }
        if self.contains(Self::DELETE) {
            text.push('d');
        }
        if self.contains(Self::PUT) {
            text.push('p');
        }
        if self.contains(Self::ADMIN) {
            text.push('a');
        }
        if self.contains(Self::EXECUTE) {
            text.push('x');
        }
        if self.contains(Self::RESERVE) {
            text.push_str("v(");
            if self.contains(Self::RESERVE_READ) {
                text.push('r');
            }
            if self.contains(Self::RESERVE_WRITE) {
                text.push('w');
            }
            if self.contains(Self::RESERVE_LIST) {
                text.push('l');
            }
            if self.contains(Self::RESERVE_DELETE) {
                text.push('d');
            }
            if self.contains(Self::RESERVE_PUT) {
                text.push('p');
            }
            if self.contains(Self::RESERVE_RESERVE) {
                text.push('v');
            }
            if self.contains(Self::RESERVE_ADMIN) {
                text.push('a');
            }
            if self.contains(Self::RESERVE_EXECUTE) {
                text.push('x');
            }
            text.push(')');
        }
        if text.is_empty() {
            text.push('n');
        }
        text
    }

    /// Parses the text grammar. Unknown characters are ignored, so any
    /// string is accepted; `n` and the empty string both yield no rights.
    pub fn from_text(t: &str) -> Rights {
        let mut rights = Rights::NONE;
        let mut chars = t.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                'r' => rights |= Self::READ,
                'w' => rights |= Self::WRITE,
                'l' => rights |= Self::LIST,
                'd' => rights |= Self::DELETE,
                'p' => rights |= Self::PUT,
                'a' => rights |= Self::ADMIN,
                'x' => rights |= Self::EXECUTE,
                'v' => {
                    rights |= Self::RESERVE;
                    if chars.peek() == Some(&'(') {
                        chars.next();
                        for sub in chars.by_ref() {
                            match sub {
                                'r' => rights |= Self::RESERVE_READ,
                                'w' => rights |= Self::RESERVE_WRITE,
                                'l' => rights |= Self::RESERVE_LIST,
                                'd' => rights |= Self::RESERVE_DELETE,
                                'p' => rights |= Self::RESERVE_PUT,
                                'v' => rights |= Self::RESERVE_RESERVE,
                                'a' => rights |= Self::RESERVE_ADMIN,
                                'x' => rights |= Self::RESERVE_EXECUTE,
                                ')' => break,
                                _ => {}
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        rights
    }

    /// Maps RESERVE sub-rights to the ordinary rights a subject receives on
    /// a subtree it creates under a RESERVE grant.
    pub fn reserve_to_ordinary(self) -> Rights {
        let mut out = Rights::NONE;
        if self.contains(Self::RESERVE_READ) {
            out |= Self::READ;
        }
        if self.contains(Self::RESERVE_WRITE) {
            out |= Self::WRITE;
        }
        if self.contains(Self::RESERVE_LIST) {
            out |= Self::LIST;
        }
        if self.contains(Self::RESERVE_DELETE) {
            out |= Self::DELETE;
        }
        if self.contains(Self::RESERVE_PUT) {
            out |= Self::PUT;
        }
        if self.contains(Self::RESERVE_RESERVE) {
            out |= Self::RESERVE;
        }
        if self.contains(Self::RESERVE_ADMIN) {
            out |= Self::ADMIN;
        }
        if self.contains(Self::RESERVE_EXECUTE) {
            out |= Self::EXECUTE;
        }
        out
    }

    /// Rights an `open` call requires. Any write-implying flag needs WRITE;
    /// a pure read needs READ; a flag-free open defaults to READ.
    pub fn from_open_flags(flags: OpenFlags) -> Rights {
        let mut rights = Rights::NONE;
        if flags.read {
            rights |= Self::READ;
        }
        if flags.write || flags.create || flags.truncate || flags.append {
            rights |= Self::WRITE;
        }
        if rights.is_empty() {
            rights = Self::READ;
        }
        rights
    }

    /// Rights an `access` call requires, from the F_OK/R_OK/W_OK/X_OK bits.
    pub fn from_access_mode(amode: i64) -> Rights {
        const R_OK: i64 = 4;
        const W_OK: i64 = 2;
        const X_OK: i64 = 1;
        let mut rights = Rights::NONE;
        if amode & R_OK != 0 {
            rights |= Self::READ;
        }
        if amode & W_OK != 0 {
            rights |= Self::WRITE;
        }
        if amode & X_OK != 0 {
            rights |= Self::EXECUTE;
        }
        if rights.is_empty() {
            rights = Self::READ;
        }
        rights
    }
}

impl BitOr for Rights {
    type Output = Rights;
    fn bitor(self, rhs: Rights) -> Rights {
        Rights(self.0 | rhs.0)
    }
}

impl BitOrAssign for Rights {
    fn bitor_assign(&mut self, rhs: Rights) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Rights {
    type Output = Rights;
    fn bitand(self, rhs: Rights) -> Rights {
        Rights(self.0 & rhs.0)
    }
}

impl fmt::Debug for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rights({})", self.to_text())
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
