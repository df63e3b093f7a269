//! Pipeline stages at which hooks can run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point in the request pipeline where out-of-process hooks are invoked.
///
/// Stages always run in declaration order of this enum:
/// `Pre → AuthCheck → Post → (upstream) → Response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    /// Before authentication and routing.
    Pre,
    /// Authentication; the hook decides whether the caller is allowed in.
    AuthCheck,
    /// After authentication, before the upstream is called.
    Post,
    /// After the upstream replied, before the response leaves the gateway.
    Response,
}

impl HookStage {
    /// All stages in execution order.
    pub const ALL: [Self; 4] = [Self::Pre, Self::AuthCheck, Self::Post, Self::Response];

    /// Returns the wire name of this stage.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::AuthCheck => "auth_check",
            Self::Post => "post",
            Self::Response => "response",
        }
    }

    /// Returns `true` for stages that run before the upstream call.
    #[must_use]
    pub const fn is_request_stage(&self) -> bool {
        !matches!(self, Self::Response)
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string does not name a [`HookStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStageError(String);

impl fmt::Display for ParseStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown hook stage '{}'", self.0)
    }
}

impl std::error::Error for ParseStageError {}

impl FromStr for HookStage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pre" => Ok(Self::Pre),
            "auth_check" | "authcheck" | "custom_key_check" => Ok(Self::AuthCheck),
            "post" => Ok(Self::Post),
            "response" => Ok(Self::Response),
            _ => Err(ParseStageError(s.to_string())),
        }
    }
}
