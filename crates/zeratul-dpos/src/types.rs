//! Core types for the DPoS engine
//!
//! Addresses, amounts, lock-time tiers and the records kept in the
//! contract store. All monetary values are [`BigUint`] and every ratio is
//! expressed in basis points.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Position of a delegation under a (validator, delegator) pair
pub type DelegationIndex = u64;

/// Basis points denominator (100%)
pub const BASIS_POINTS: u64 = 10_000;

/// Token decimals
pub const TOKEN_DECIMALS: u32 = 18;

/// Seconds in a (non-leap) year
pub const YEAR_SECONDS: u64 = 31_536_000;

/// Index 0 of every (validator, delegator) pair holds unclaimed rewards
pub const REWARD_DELEGATION_INDEX: DelegationIndex = 0;

/// Raw delegation totals are divided by this before becoming voting power
pub const POWER_CORRECTION: u64 = 1_000_000_000_000;

/// Chain id of the limbo sentinel validator
pub const LIMBO_CHAIN_ID: &str = "limbo";

/// Length of the local part of an address
pub const LOCAL_ADDRESS_LEN: usize = 20;

/// `amount * bps / 10000`
pub fn fraction(bps: u64, amount: &BigUint) -> BigUint {
    amount * BigUint::from(bps) / BigUint::from(BASIS_POINTS)
}

/// Whole tokens scaled by [`TOKEN_DECIMALS`]
pub fn tokens(whole: u64) -> BigUint {
    BigUint::from(whole) * BigUint::from(10u32).pow(TOKEN_DECIMALS)
}

/// Chain-qualified address
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub chain_id: String,
    pub local: [u8; LOCAL_ADDRESS_LEN],
}

impl Address {
    pub fn new(chain_id: impl Into<String>, local: [u8; LOCAL_ADDRESS_LEN]) -> Self {
        Self {
            chain_id: chain_id.into(),
            local,
        }
    }

    /// Sentinel validator that holds undelegated stake
    pub fn limbo() -> Self {
        Self::new(LIMBO_CHAIN_ID, [0u8; LOCAL_ADDRESS_LEN])
    }

    pub fn is_limbo(&self) -> bool {
        self.chain_id == LIMBO_CHAIN_ID && self.local == [0u8; LOCAL_ADDRESS_LEN]
    }

    /// Store key encoding: u16 BE chain id length, chain id, local bytes.
    ///
    /// The length prefix keeps one address key from ever being a prefix of
    /// another, so composite keys can be range-scanned safely.
    pub fn key_bytes(&self) -> Result<Vec<u8>, AddressParseError> {
        let chain = self.chain_id.as_bytes();
        let len = u16::try_from(chain.len()).map_err(|_| AddressParseError::ChainIdTooLong(chain.len()))?;
        let mut out = Vec::with_capacity(2 + chain.len() + LOCAL_ADDRESS_LEN);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(chain);
        out.extend_from_slice(&self.local);
        Ok(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:0x{}", self.chain_id, hex::encode(self.local))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AddressParseError {
    #[error("missing chain id separator ':'")]
    MissingChainId,
    #[error("empty chain id")]
    EmptyChainId,
    #[error("chain id of {0} bytes exceeds {max}", max = u16::MAX)]
    ChainIdTooLong(usize),
    #[error("invalid hex in local address: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("local address must be {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain_id, local) = s.rsplit_once(':').ok_or(AddressParseError::MissingChainId)?;
        if chain_id.is_empty() {
            return Err(AddressParseError::EmptyChainId);
        }
        if chain_id.len() > usize::from(u16::MAX) {
            return Err(AddressParseError::ChainIdTooLong(chain_id.len()));
        }
        let local = local.strip_prefix("0x").unwrap_or(local);
        let bytes = hex::decode(local)?;
        let local: [u8; LOCAL_ADDRESS_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| AddressParseError::InvalidLength {
                    expected: LOCAL_ADDRESS_LEN,
                    got: bytes.len(),
                })?;
        Ok(Self::new(chain_id, local))
    }
}

/// Lock-time commitment. Longer locks earn a larger reward weight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LocktimeTier {
    #[default]
    TwoWeeks,
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl LocktimeTier {
    pub const ALL: [LocktimeTier; 4] = [
        LocktimeTier::TwoWeeks,
        LocktimeTier::ThreeMonths,
        LocktimeTier::SixMonths,
        LocktimeTier::OneYear,
    ];

    /// Lock duration in seconds
    pub fn duration(self) -> u64 {
        match self {
            LocktimeTier::TwoWeeks => 1_209_600,
            LocktimeTier::ThreeMonths => 7_776_000,
            LocktimeTier::SixMonths => 15_552_000,
            LocktimeTier::OneYear => 31_536_000,
        }
    }

    /// Reward weight in basis points
    pub fn weight_bps(self) -> u64 {
        match self {
            LocktimeTier::TwoWeeks => 10_000,
            LocktimeTier::ThreeMonths => 15_000,
            LocktimeTier::SixMonths => 20_000,
            LocktimeTier::OneYear => 40_000,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for LocktimeTier {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        LocktimeTier::ALL.get(value as usize).copied().ok_or(value)
    }
}

/// Tier-weighted amount used for elections and rewards
pub fn weighted_amount(amount: &BigUint, tier: LocktimeTier) -> BigUint {
    fraction(tier.weight_bps(), amount)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationState {
    #[default]
    Bonding,
    Bonded,
    Unbonding,
    Redelegating,
}

/// A stake bound by a delegator to a validator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub validator: Address,
    pub delegator: Address,
    pub index: DelegationIndex,
    /// Live principal, counted in voting power
    pub amount: BigUint,
    /// Pending change resolved at the next election
    pub update_amount: BigUint,
    pub locktime_tier: LocktimeTier,
    pub lock_time: Timestamp,
    pub state: DelegationState,
    pub referrer: Option<String>,
    /// Redelegation target
    pub update_validator: Option<Address>,
    pub update_locktime_tier: Option<LocktimeTier>,
}

impl Delegation {
    /// Zero-valued record, also what queries report for absent keys
    pub fn empty(validator: Address, delegator: Address, index: DelegationIndex) -> Self {
        Self {
            validator,
            delegator,
            index,
            amount: BigUint::ZERO,
            update_amount: BigUint::ZERO,
            locktime_tier: LocktimeTier::TwoWeeks,
            lock_time: 0,
            state: DelegationState::Bonded,
            referrer: None,
            update_validator: None,
            update_locktime_tier: None,
        }
    }

    pub fn is_reward_entry(&self) -> bool {
        self.index == REWARD_DELEGATION_INDEX
    }

    pub fn is_drained(&self) -> bool {
        self.amount == BigUint::ZERO && self.update_amount == BigUint::ZERO
    }

    pub fn weighted_amount(&self) -> BigUint {
        weighted_amount(&self.amount, self.locktime_tier)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    #[default]
    Registered,
    AboutToChangeFee,
    ChangingFee,
    Unregistering,
}

/// Validator candidate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub address: Address,
    pub pubkey: Vec<u8>,
    /// Current fee in basis points
    pub fee: u64,
    /// Staged fee, becomes `fee` two elections after a change
    pub new_fee: u64,
    pub state: CandidateState,
    /// Share of the fee cut paid to referrers, in basis points
    pub max_referral_percentage: u64,
    pub name: String,
    pub description: String,
    pub website: String,
}

impl Candidate {
    pub fn is_unregistering(&self) -> bool {
        self.state == CandidateState::Unregistering
    }
}

/// Per-candidate election bookkeeping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStatistic {
    pub address: Address,
    pub whitelist_amount: BigUint,
    pub whitelist_locktime_tier: LocktimeTier,
    /// Weighted total computed at the last election
    pub delegation_total: BigUint,
    /// Rewards generated by this validator in the last election
    pub distribution_total: BigUint,
}

impl ValidatorStatistic {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            whitelist_amount: BigUint::ZERO,
            whitelist_locktime_tier: LocktimeTier::TwoWeeks,
            delegation_total: BigUint::ZERO,
            distribution_total: BigUint::ZERO,
        }
    }

    pub fn weighted_whitelist_amount(&self) -> BigUint {
        weighted_amount(&self.whitelist_amount, self.whitelist_locktime_tier)
    }
}

/// Member of the active validator set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub power: BigUint,
    pub delegation_total: BigUint,
}

/// Contract parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Minimum seconds between elections
    pub election_cycle_length: u64,
    pub max_yearly_reward: BigUint,
    /// Stake a non-whitelisted candidate locks at registration
    pub registration_requirement: BigUint,
    pub oracle_address: Option<Address>,
    /// Size of the elected set
    pub validator_count: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            election_cycle_length: 600,
            max_yearly_reward: tokens(60_000_000),
            registration_requirement: tokens(1_250_000),
            oracle_address: None,
            validator_count: 21,
        }
    }
}

/// Singleton contract state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    pub params: Params,
    pub validators: Vec<Validator>,
    pub last_election_time: Timestamp,
    /// Weighted total of the elected set
    pub total_validator_delegations: BigUint,
    /// Start of the current reward year, unset until the first budget check
    pub reward_year_start: Option<Timestamp>,
    pub reward_year_distributed: BigUint,
    /// Cumulative rewards since genesis
    pub total_rewards_distributed: BigUint,
}

/// Caller identity and block time of a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Address,
    pub now: Timestamp,
}

impl CallContext {
    pub fn new(sender: Address, now: Timestamp) -> Self {
        Self { sender, now }
    }
}
