//! Identity tokens for logs and producers.
//!
//! Identities are UUID v7 values generated locally at construction time.
//! Two logs created in the same process (or the same test) never share an
//! identity, and no process-wide counter is involved.
//!
//! Each identity displays with a short kind tag (`log:…`, `producer:…`)
//! so mixed identities in one log line stay readable. Parsing accepts the
//! tagged form as well as a bare UUID.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a tagged UUID v7 identity type.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident => $tag:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Kind tag shown in front of the UUID when displayed.
            pub const TAG: &'static str = $tag;

            /// Generate a fresh, time-ordered identity.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// The underlying UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}:{}", Self::TAG, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bare = s
                    .strip_prefix(Self::TAG)
                    .and_then(|rest| rest.strip_prefix(':'))
                    .unwrap_or(s);
                Uuid::parse_str(bare).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identity token of a single state log.
    ///
    /// Used wherever a log has to be embedded as a key elsewhere (for
    /// example when a producer keeps track of the collectors it is bound to).
    LogId => "log"
}

define_id! {
    /// Identity of a state producer (an "instance" keying a tape).
    ProducerId => "producer"
}
