use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use super::error::{CoreError, CoreResult, InvalidIdSnafu};

// Every id wrapper shares one shape so snapshots serialize them identically.
macro_rules! define_id {
    ($name:ident, $id_type:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn parse(raw: &str) -> CoreResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(raw: &str) -> CoreResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_id!(SessionId, "session-id");
define_id!(MessageId, "message-id");

impl SessionId {
    /// Fresh random id handed out once per application session.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl MessageId {
    /// Time-ordered id, so ids sort in append order within a process.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}
