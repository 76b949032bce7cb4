//! Transaction identity and status.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a logical transaction.
///
/// The id doubles as the document id of the transaction log and is
/// always encoded as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the textual form produced by `Display`.
    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).ok_or_else(|| serde::de::Error::custom("invalid transaction id"))
    }
}

/// Status of a transaction log.
///
/// Legal transitions:
/// - `Pending -> Committed`
/// - `Pending -> RollingBack -> RolledBack`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Operations are executing.
    Pending,
    /// A step failed; compensations are running.
    RollingBack,
    /// Rollback finished.
    RolledBack,
    /// Every operation succeeded.
    Committed,
}

impl TransactionStatus {
    /// Returns true if the log will never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::RolledBack)
    }

    /// Returns true if moving to `next` is legal.
    #[must_use]
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Committed) | (Pending, RollingBack) | (RollingBack, RolledBack)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::RolledBack => "ROLLED_BACK",
            TransactionStatus::Committed => "COMMITTED",
        };
        f.write_str(name)
    }
}
