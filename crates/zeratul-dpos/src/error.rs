//! Contract errors

use crate::store::StoreError;
use crate::token::TokenError;
use crate::types::{Address, AddressParseError, DelegationIndex, Timestamp};

/// Error class, used by hosts to map failures onto receipts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Validation,
    State,
    ExternalCall,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum DposError {
    // authorization
    #[error("{0} is not authorized to perform this call")]
    NotAuthorized(Address),

    // validation
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("amount exceeds available {available}")]
    AmountTooLarge { available: String },
    #[error("invalid locktime tier {0}")]
    InvalidTier(u8),
    #[error("invalid delegation index {0}")]
    InvalidIndex(DelegationIndex),
    #[error("fee {0} exceeds 10000 basis points")]
    InvalidFee(u64),
    #[error("referral percentage {0} exceeds 10000 basis points")]
    InvalidReferralPercentage(u64),
    #[error("request batch is empty")]
    EmptyBatch,
    #[error("source and target validator are the same")]
    SameValidator,
    #[error("validator count must be positive")]
    InvalidValidatorCount,
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressParseError),

    // state
    #[error("{0} is not a registered candidate")]
    NotRegistered(Address),
    #[error("{0} is already registered")]
    AlreadyRegistered(Address),
    #[error("candidate {0} not found")]
    CandidateNotFound(Address),
    #[error("candidate {0} is unregistering")]
    CandidateUnregistering(Address),
    #[error("delegation is locked until {lock_time}")]
    StillLocked { lock_time: Timestamp },
    #[error("delegation {validator}/{delegator}/{index} not found")]
    DelegationNotFound {
        validator: Address,
        delegator: Address,
        index: DelegationIndex,
    },
    #[error("delegation has pending changes")]
    DelegationNotBonded,
    #[error("referrer {0} not found")]
    ReferrerNotFound(String),
    #[error("{0} is not whitelisted")]
    NotWhitelisted(Address),
    #[error("fee change already in progress")]
    FeeChangeInProgress,

    // external calls
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("token call failed: {0}")]
    Token(TokenError),

    // internal
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
}

impl DposError {
    pub fn kind(&self) -> ErrorKind {
        use DposError::*;
        match self {
            NotAuthorized(_) => ErrorKind::Authorization,
            ZeroAmount
            | AmountTooLarge { .. }
            | InvalidTier(_)
            | InvalidIndex(_)
            | InvalidFee(_)
            | InvalidReferralPercentage(_)
            | EmptyBatch
            | SameValidator
            | InvalidValidatorCount
            | InvalidAddress(_) => ErrorKind::Validation,
            NotRegistered(_)
            | AlreadyRegistered(_)
            | CandidateNotFound(_)
            | CandidateUnregistering(_)
            | StillLocked { .. }
            | DelegationNotFound { .. }
            | DelegationNotBonded
            | ReferrerNotFound(_)
            | NotWhitelisted(_)
            | FeeChangeInProgress => ErrorKind::State,
            InsufficientBalance | Token(_) => ErrorKind::ExternalCall,
            Store(_) | Codec(_) => ErrorKind::Internal,
        }
    }
}

impl From<TokenError> for DposError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InsufficientBalance { .. } => DposError::InsufficientBalance,
            other => DposError::Token(other),
        }
    }
}

pub type Result<T, E = DposError> = std::result::Result<T, E>;
