//! Zeratul DPoS - Delegated Proof-of-Stake Engine
//!
//! Candidates register, token holders delegate to them under time-lock tiers,
//! and a periodic election picks the validator set and pays out rewards.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         CALLERS                                     │
//! │  candidates · delegators · oracle (whitelists, params) · chain      │
//! └───────────────┬───────────────────────────────────┬─────────────────┘
//!                 │ Transaction                       │ elect(now)
//!                 ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Dpos                                       │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────────┐ ┌──────────────┐  │
//! │  │  Registry    │ │   Ledger     │ │   Batch    │ │  Election    │  │
//! │  │ (candidates) │ │(delegations) │ │  (oracle)  │ │(rank, reward,│  │
//! │  └──────┬───────┘ └──────┬───────┘ └─────┬──────┘ │ power cap)   │  │
//! │         └────────────────┴───────────────┴────────┴──────┬───────┘  │
//! │                                                          ▼          │
//! │                  Overlay ──commit on Ok──▶ KvStore                  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                 │ transfer / transfer_from
//!                 ▼
//!           TokenLedger
//! ```
//!
//! # Lifecycle of a delegation
//!
//! 1. `Delegate` pulls tokens into the contract and records a `Bonding` entry
//! 2. The next election merges it into the live amount (`Bonded`)
//! 3. `Unbond` marks it `Unbonding` once its lock expires
//! 4. The next election pays the principal back out
//!
//! Rewards accrue on a per-(validator, delegator) entry with index 0 and are
//! claimed by unbonding that entry.

pub mod types;
pub mod error;
pub mod store;
pub mod token;
pub mod state;
pub mod roles;
pub mod power;
pub mod rewards;
pub mod ledger;
pub mod registry;
pub mod batch;
pub mod election;
pub mod queries;
pub mod contract;
pub mod config;

pub use types::*;
pub use error::{DposError, ErrorKind, Result};
pub use store::{KvRead, KvStore, MemoryStore, Overlay, StoreError};
pub use token::{MemoryToken, TokenError, TokenLedger};
pub use state::{Db, RequestMeta};
pub use power::apply_power_cap;
pub use rewards::calculate_rewards;
pub use registry::CandidateRegistration;
pub use batch::{BatchPayload, BatchReport, BatchRequest};
pub use election::{ElectionOutcome, ElectionReport, Payout};
pub use queries::{CandidateInfo, DelegationSummary, Queries, ValidatorDelegations, ValidatorInfo};
pub use contract::{Dpos, Receipt, Transaction};
pub use config::{ConfigError, DposConfig, Scenario};
