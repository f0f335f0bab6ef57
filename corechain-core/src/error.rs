use thiserror::Error;

/// Reasons a transaction or block is rejected. These are the "drop" branch
/// of the error taxonomy (spec.md §7) — never fatal to the engine on their
/// own, and never leaked to external callers beyond this tag + a short
/// phrase.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("signature/pubkey count mismatch")]
    SignatureCountMismatch,
    #[error("signature invalid")]
    BadSignature,
    #[error("unknown sender account")]
    UnknownSender,
    #[error("nonce mismatch: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },
    #[error("recipient address missing or malformed")]
    BadRecipient,
    #[error("message exceeds length cap")]
    MessageTooLong,
    #[error("unexpected block height: expected {expected}, got {got}")]
    BadHeight { expected: u64, got: u64 },
    #[error("block time not after median of last {window} blocks")]
    BadTimeTooEarly { window: usize },
    #[error("block time too far in the future")]
    BadTimeTooLate,
    #[error("block target does not match retarget schedule")]
    BadTarget,
    #[error("proof of work does not meet target")]
    PowNotMet,
    #[error("missing or malformed reward transaction")]
    BadReward,
    #[error("reward amount {got} does not match schedule {expected}")]
    BadRewardAmount { expected: u64, got: u64 },
    #[error("block prev_hash does not match local tip")]
    BadPrevHash,
}

impl ValidationError {
    /// A stable tag safe to return to external callers (spec.md §7:
    /// "a short phrase plus a stable kind tag").
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::Malformed(_) => "malformed",
            ValidationError::SignatureCountMismatch | ValidationError::BadSignature => {
                "bad_signature"
            }
            ValidationError::UnknownSender => "unknown_sender",
            ValidationError::BadNonce { .. } => "bad_nonce",
            ValidationError::InsufficientBalance { .. } => "insufficient_balance",
            ValidationError::BadRecipient => "bad_recipient",
            ValidationError::MessageTooLong => "message_too_long",
            ValidationError::BadHeight { .. } => "bad_height",
            ValidationError::BadTimeTooEarly { .. } => "bad_time",
            ValidationError::BadTimeTooLate => "bad_time",
            ValidationError::BadTarget => "bad_target",
            ValidationError::PowNotMet => "pow_not_met",
            ValidationError::BadReward | ValidationError::BadRewardAmount { .. } => "bad_reward",
            ValidationError::BadPrevHash => "bad_prev_hash",
        }
    }
}
