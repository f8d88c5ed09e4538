use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T, E = FlipError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FlipError {
    #[error("none of the {tried} configured endpoint(s) answered a liveness probe")]
    NoReachableEndpoint { tried: usize },

    #[error("read from {endpoint} failed: {reason}")]
    TransientReadFailure { endpoint: String, reason: String },

    /// The remote program refused the wager. Never retried.
    #[error("wager rejected: {0}")]
    SubmissionRejected(String),

    /// The wager may or may not have landed remotely.
    #[error("wager submission via {endpoint} failed: {reason}")]
    SubmissionTransportError { endpoint: String, reason: String },

    #[error("outcome of transaction {tx_id} could not be determined")]
    OutcomeIndeterminate { tx_id: String },

    #[error("invalid wager amount {0}")]
    InvalidWager(String),

    #[error("wager of {wager} exceeds the current balance of {balance}")]
    InsufficientBalance { wager: Decimal, balance: Decimal },

    #[error("{owner} holds no token account for mint {mint}")]
    MissingTokenAccount { owner: String, mint: String },

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("wallet error: {0}")]
    Wallet(String),
}

impl FlipError {
    pub(crate) fn decode(what: &'static str, reason: impl ToString) -> Self {
        FlipError::Decode {
            what,
            reason: reason.to_string(),
        }
    }

    /// Failures that leave the remote state unknown or unchanged and may clear
    /// up after an endpoint switch.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlipError::TransientReadFailure { .. })
    }
}
