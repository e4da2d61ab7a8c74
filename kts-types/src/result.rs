//! Verification result codes
//!
//! A [`ResultCode`] accumulates the outcome of every check run during one
//! verification. Failure and success flags live in separate bitmasks because
//! their numeric values overlap. Codes only ever grow: combining two codes ORs
//! both masks and nothing clears a bit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident { $($flag:ident = $value:expr),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            $(pub const $flag: Self = Self($value);)+

            const NAMED: &'static [(&'static str, $name)] = &[$((stringify!($flag), Self::$flag)),+];

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Keeps unknown bits so codes from newer peers survive a round trip
            pub const fn from_bits_retain(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Names of the flags set in this mask
            pub fn names(self) -> Vec<&'static str> {
                Self::NAMED
                    .iter()
                    .filter(|(_, flag)| self.contains(*flag))
                    .map(|(name, _)| *name)
                    .collect()
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x}: {})", stringify!($name), self.0, self.names().join(" | "))
            }
        }
    };
}

flag_set! {
    /// Checks that failed
    Failures {
        SYNTACTIC_CHECK_FAILURE = 1,
        HASHCHAIN_VERIFICATION_FAILURE = 2,
        PUBLIC_KEY_SIGNATURE_FAILURE = 16,
        NOT_VALID_PUBLIC_KEY_FAILURE = 64,
        WRONG_DOCUMENT_FAILURE = 128,
        NOT_VALID_PUBLICATION = 256,
    }
}

flag_set! {
    /// Checks that ran and passed
    Checks {
        PUBLIC_KEY_SIGNATURE_PRESENT = 1,
        PUBLICATION_REFERENCE_PRESENT = 2,
        DOCUMENT_HASH_CHECKED = 16,
        PUBLICATION_CHECKED = 32,
    }
}

impl Failures {
    /// Failures that mean the token is internally inconsistent
    pub const SELF_CHECK: Failures = Failures(
        Failures::SYNTACTIC_CHECK_FAILURE.0
            | Failures::HASHCHAIN_VERIFICATION_FAILURE.0
            | Failures::PUBLIC_KEY_SIGNATURE_FAILURE.0,
    );
}

/// Combined outcome of the checks run against one token
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultCode {
    pub failures: Failures,
    pub checks: Checks,
}

impl ResultCode {
    pub const fn new(failures: Failures, checks: Checks) -> Self {
        Self { failures, checks }
    }

    pub const fn failed(failure: Failures) -> Self {
        Self::new(failure, Checks::empty())
    }

    pub const fn passed(check: Checks) -> Self {
        Self::new(Failures::empty(), check)
    }

    /// True when no check failed
    pub const fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub const fn has_failure(&self, failure: Failures) -> bool {
        self.failures.intersects(failure)
    }

    pub const fn has_check(&self, check: Checks) -> bool {
        self.checks.contains(check)
    }
}

impl BitOr for ResultCode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            failures: self.failures | rhs.failures,
            checks: self.checks | rhs.checks,
        }
    }
}

impl BitOrAssign for ResultCode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.failures |= rhs.failures;
        self.checks |= rhs.checks;
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCode")
            .field("failures", &self.failures)
            .field("checks", &self.checks)
            .finish()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let checks = self.checks.names();
        if self.is_valid() {
            write!(f, "valid [{}]", checks.join(", "))
        } else {
            write!(
                f,
                "invalid: {} [{}]",
                self.failures.names().join(", "),
                checks.join(", ")
            )
        }
    }
}
