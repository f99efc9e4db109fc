//! Error types for Authmesh

use thiserror::Error;

/// Failure to parse a `YYYY-MM` billing period key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid billing period '{0}': expected YYYY-MM")]
pub struct PeriodParseError(pub String);
