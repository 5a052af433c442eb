//! Identifier newtypes, all ULID-backed for chronological sorting.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Create a new unique identifier.
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse an identifier from its canonical string form.
            pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
                Ok(Self(Ulid::from_string(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

ulid_id!(
    /// Identity of a tracked application and of the queue item that carries it.
    ApplicationId
);
ulid_id!(
    /// The applicant on whose behalf submissions are made.
    UserId
);
ulid_id!(
    /// A job posting on the external board.
    JobId
);
ulid_id!(
    /// A resume owned by a user.
    ResumeId
);
ulid_id!(
    /// Groups the applications created from one batch request.
    BatchId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_display_output() {
        let id = ApplicationId::new();
        let parsed = ApplicationId::parse(&id.to_string()).ok();
        assert_eq!(parsed, Some(id));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(UserId::parse("not-a-ulid").is_err());
        assert!("".parse::<JobId>().is_err());
    }

    #[test]
    fn serializes_as_bare_string() -> Result<(), serde_json::Error> {
        let id = BatchId::new();
        let json = serde_json::to_string(&id)?;
        assert_eq!(json, format!("\"{id}\""));
        Ok(())
    }
}
