//! Session Authentication State
//!
//! The search endpoint never says "you are logged in". A session counts as
//! authenticated once the login response has planted seven specific cookies
//! for the host. [`AuthState`] is a bitmask over those cookies.
//!
//! # Cookies
//!
//! | Flag | Cookie |
//! |------|--------|
//! | `EDGE_ID` | `__cfduid` |
//! | `WORKSTATION_ID` | `qs_wsid` |
//! | `INSTANCE_ID` | `Instid` |
//! | `EDGE_ROUTE` | `__cfruid` |
//! | `SESSION_ID` | `SessionID` |
//! | `USER_ID` | `UsrID` |
//! | `USER_NAME` | `UsrName` |

use std::fmt;

// =============================================================================
// Auth State
// =============================================================================

/// Bitmask of session cookies observed in the jar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AuthState(u8);

impl AuthState {
    /// Edge proxy id cookie (`__cfduid`).
    pub const EDGE_ID: Self = Self(1 << 0);
    /// Workstation id cookie (`qs_wsid`).
    pub const WORKSTATION_ID: Self = Self(1 << 1);
    /// Instance id cookie (`Instid`).
    pub const INSTANCE_ID: Self = Self(1 << 2);
    /// Edge route cookie (`__cfruid`).
    pub const EDGE_ROUTE: Self = Self(1 << 3);
    /// Session id cookie (`SessionID`).
    pub const SESSION_ID: Self = Self(1 << 4);
    /// User id cookie (`UsrID`).
    pub const USER_ID: Self = Self(1 << 5);
    /// User name cookie (`UsrName`).
    pub const USER_NAME: Self = Self(1 << 6);

    /// No cookies observed.
    pub const EMPTY: Self = Self(0);

    /// All seven cookies observed.
    pub const AUTHENTICATED: Self = Self(0b0111_1111);

    /// Cookie names paired with their flag.
    pub const COOKIES: [(&'static str, Self); 7] = [
        ("__cfduid", Self::EDGE_ID),
        ("qs_wsid", Self::WORKSTATION_ID),
        ("Instid", Self::INSTANCE_ID),
        ("__cfruid", Self::EDGE_ROUTE),
        ("SessionID", Self::SESSION_ID),
        ("UsrID", Self::USER_ID),
        ("UsrName", Self::USER_NAME),
    ];

    /// Flag for a cookie name, if it is one of the session cookies.
    #[must_use]
    pub fn flag_for(name: &str) -> Option<Self> {
        Self::COOKIES
            .iter()
            .find(|(cookie, _)| *cookie == name)
            .map(|(_, flag)| *flag)
    }

    /// Compute state from the names present in a cookie jar.
    ///
    /// Depends only on the set of names; order, duplicates and unrelated
    /// cookies make no difference.
    #[must_use]
    pub fn from_cookie_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .filter_map(Self::flag_for)
            .fold(Self::EMPTY, |acc, flag| acc | flag)
    }

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Flags still missing before the session is authenticated.
    #[must_use]
    pub const fn missing(self) -> Self {
        Self(Self::AUTHENTICATED.0 ^ (self.0 & Self::AUTHENTICATED.0))
    }

    /// Whether every session cookie is present.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        self.missing().0 == 0
    }

    /// Whether `flag` is set.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Names of the cookies still missing.
    #[must_use]
    pub fn missing_cookies(self) -> Vec<&'static str> {
        let missing = self.missing();
        Self::COOKIES
            .iter()
            .filter(|(_, flag)| missing.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl std::ops::BitOr for AuthState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for AuthState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#09b}", self.0)
    }
}

// =============================================================================
// Login Attempt Counter
// =============================================================================

/// Counts consecutive failed logins for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginAttemptCounter {
    failures: u32,
    max_attempts: u32,
}

impl LoginAttemptCounter {
    /// Create a counter with the configured ceiling.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            failures: 0,
            max_attempts,
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` while the session may retry, `false` once the
    /// ceiling has been exceeded.
    pub const fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        !self.is_exhausted()
    }

    /// Reset after a successful login.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    /// Failed attempts since the last success.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Configured ceiling.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the ceiling has been exceeded.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.failures > self.max_attempts
    }
}
