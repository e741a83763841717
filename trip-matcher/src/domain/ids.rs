//! Identifier types for trips, users and trip groups.
//!
//! Records refer to each other only through these ids. A relation never
//! holds a live handle to another record, so every cross-record read goes
//! back through the store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when parsing an invalid identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id: {reason}")]
pub struct InvalidId {
    kind: &'static str,
    reason: &'static str,
}

fn check_id(kind: &'static str, s: &str, max_len: usize) -> Result<(), InvalidId> {
    if s.is_empty() {
        return Err(InvalidId {
            kind,
            reason: "cannot be empty",
        });
    }
    if s.len() > max_len {
        return Err(InvalidId {
            kind,
            reason: "too long",
        });
    }
    if s.contains('/') {
        return Err(InvalidId {
            kind,
            reason: "cannot contain '/'",
        });
    }
    if s.chars().any(char::is_whitespace) {
        return Err(InvalidId {
            kind,
            reason: "cannot contain whitespace",
        });
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $max_len:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an id from a string, validating its shape.
            pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
                let s = s.into();
                check_id($kind, &s, $max_len)?;
                Ok(Self(s))
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a trip record.
    ///
    /// # Examples
    ///
    /// ```
    /// use trip_matcher::domain::TripId;
    ///
    /// let id = TripId::new("trip-42").unwrap();
    /// assert_eq!(id.as_str(), "trip-42");
    ///
    /// // Path separators and empty strings are rejected
    /// assert!(TripId::new("trips/42").is_err());
    /// assert!(TripId::new("").is_err());
    /// ```
    TripId,
    "trip",
    128
);

string_id!(
    /// Identifier of the user who owns a trip.
    UserId,
    "user",
    128
);

string_id!(
    /// Identifier of a trip group record.
    TripGroupId,
    "trip group",
    160
);

impl TripGroupId {
    /// Id of the group founded by `trip`. The same founder always yields
    /// the same id.
    pub fn founded_by(trip: &TripId) -> Self {
        Self(format!("group-{}", trip.as_str()))
    }
}
