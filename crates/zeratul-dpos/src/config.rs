//! YAML configuration and simulator scenarios
//!
//! Amounts are whole tokens and addresses are `chain:0xhex` strings. Both
//! are converted into engine types before anything touches a contract.

use crate::batch::{BatchPayload, BatchRequest};
use crate::contract::Transaction;
use crate::registry::CandidateRegistration;
use crate::state::RequestMeta;
use crate::types::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid address {input:?}: {source}")]
    Address {
        input: String,
        #[source]
        source: AddressParseError,
    },
    #[error("invalid locktime tier {0}")]
    Tier(u8),
    #[error("step {step}: {reason}")]
    Step { step: usize, reason: String },
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_yaml::from_str(&text)?)
}

pub fn parse_address(input: &str) -> Result<Address, ConfigError> {
    input.parse().map_err(|source| ConfigError::Address {
        input: input.to_string(),
        source,
    })
}

fn parse_tier(tier: u8) -> Result<LocktimeTier, ConfigError> {
    LocktimeTier::try_from(tier).map_err(ConfigError::Tier)
}

/// Contract parameters with amounts in whole tokens
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamsConfig {
    pub election_cycle_length: u64,
    pub max_yearly_reward: u64,
    pub registration_requirement: u64,
    pub validator_count: u64,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            election_cycle_length: 600,
            max_yearly_reward: 60_000_000,
            registration_requirement: 1_250_000,
            validator_count: 21,
        }
    }
}

/// Top-level simulator configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DposConfig {
    pub params: ParamsConfig,
    pub oracle: Option<String>,
    /// Address the contract holds its funds under
    pub contract: Option<String>,
    /// Token balances minted before the first step
    pub genesis: BTreeMap<String, u64>,
}

impl DposConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_params(&self) -> Result<Params, ConfigError> {
        Ok(Params {
            election_cycle_length: self.params.election_cycle_length,
            max_yearly_reward: tokens(self.params.max_yearly_reward),
            registration_requirement: tokens(self.params.registration_requirement),
            oracle_address: self.oracle.as_deref().map(parse_address).transpose()?,
            validator_count: self.params.validator_count,
        })
    }

    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        match &self.contract {
            Some(addr) => parse_address(addr),
            None => Ok(Address::new("default", [0xdd; LOCAL_ADDRESS_LEN])),
        }
    }

    pub fn genesis_balances(&self) -> Result<Vec<(Address, BigUint)>, ConfigError> {
        self.genesis
            .iter()
            .map(|(addr, amount)| Ok((parse_address(addr)?, tokens(*amount))))
            .collect()
    }
}

/// One scenario action, as written in YAML
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Allow the contract to pull `amount` from the sender
    Approve { amount: u64 },
    RegisterCandidate {
        #[serde(default)]
        fee: Option<u64>,
        #[serde(default)]
        max_referral_percentage: Option<u64>,
        #[serde(default)]
        name: String,
    },
    UnregisterCandidate,
    ChangeFee { fee: u64 },
    Whitelist { candidate: String, amount: u64, tier: u8 },
    RemoveWhitelist { candidate: String },
    /// Whitelist through an oracle batch
    Batch {
        block: u64,
        log: u64,
        candidate: String,
        amount: u64,
        tier: u8,
    },
    Delegate {
        validator: String,
        amount: u64,
        #[serde(default)]
        tier: Option<u8>,
        #[serde(default)]
        referrer: Option<String>,
    },
    Redelegate {
        from: String,
        to: String,
        amount: u64,
        index: DelegationIndex,
        #[serde(default)]
        tier: Option<u8>,
    },
    Unbond { validator: String, amount: u64, index: DelegationIndex },
    RegisterReferrer { name: String, address: String },
    Elect,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub at: Timestamp,
    #[serde(default)]
    pub sender: Option<String>,
    pub action: Action,
}

/// A step with every string resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedStep {
    Approve { owner: Address, amount: BigUint },
    Execute { ctx: CallContext, tx: Transaction },
    Elect { now: Timestamp },
}

impl Step {
    pub fn resolve(&self, index: usize) -> Result<ResolvedStep, ConfigError> {
        let now = self.at;
        let tx = match &self.action {
            Action::Elect => return Ok(ResolvedStep::Elect { now }),
            Action::Approve { amount } => {
                return Ok(ResolvedStep::Approve {
                    owner: self.sender(index)?,
                    amount: tokens(*amount),
                })
            }
            Action::RegisterCandidate {
                fee,
                max_referral_percentage,
                name,
            } => Transaction::RegisterCandidate(CandidateRegistration {
                fee: *fee,
                max_referral_percentage: *max_referral_percentage,
                name: name.clone(),
                ..CandidateRegistration::default()
            }),
            Action::UnregisterCandidate => Transaction::UnregisterCandidate,
            Action::ChangeFee { fee } => Transaction::ChangeFee { fee: *fee },
            Action::Whitelist { candidate, amount, tier } => Transaction::WhitelistCandidate {
                candidate: parse_address(candidate)?,
                amount: tokens(*amount),
                locktime_tier: parse_tier(*tier)?,
            },
            Action::RemoveWhitelist { candidate } => Transaction::RemoveWhitelistedCandidate {
                candidate: parse_address(candidate)?,
            },
            Action::Batch {
                block,
                log,
                candidate,
                amount,
                tier,
            } => Transaction::ProcessRequestBatch(vec![BatchRequest {
                meta: RequestMeta {
                    block_number: *block,
                    tx_index: 0,
                    log_index: *log,
                },
                payload: BatchPayload::WhitelistCandidate {
                    candidate: parse_address(candidate)?,
                    amount: tokens(*amount),
                    locktime_tier: parse_tier(*tier)?,
                },
            }]),
            Action::Delegate {
                validator,
                amount,
                tier,
                referrer,
            } => Transaction::Delegate {
                validator: parse_address(validator)?,
                amount: tokens(*amount),
                locktime_tier: tier.map(parse_tier).transpose()?,
                referrer: referrer.clone(),
            },
            Action::Redelegate {
                from,
                to,
                amount,
                index,
                tier,
            } => Transaction::Redelegate {
                from: parse_address(from)?,
                to: parse_address(to)?,
                amount: tokens(*amount),
                index: *index,
                new_locktime_tier: tier.map(parse_tier).transpose()?,
            },
            Action::Unbond {
                validator,
                amount,
                index,
            } => Transaction::Unbond {
                validator: parse_address(validator)?,
                amount: tokens(*amount),
                index: *index,
            },
            Action::RegisterReferrer { name, address } => Transaction::RegisterReferrer {
                name: name.clone(),
                address: parse_address(address)?,
            },
        };
        Ok(ResolvedStep::Execute {
            ctx: CallContext::new(self.sender(index)?, now),
            tx,
        })
    }

    fn sender(&self, index: usize) -> Result<Address, ConfigError> {
        let sender = self.sender.as_deref().ok_or_else(|| ConfigError::Step {
            step: index,
            reason: "missing sender".into(),
        })?;
        parse_address(sender)
    }
}

/// Timed list of actions replayed by the simulator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Resolve every step, rejecting steps that go back in time
    pub fn resolve(&self) -> Result<Vec<ResolvedStep>, ConfigError> {
        let mut last = 0;
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                if step.at < last {
                    return Err(ConfigError::Step {
                        step: i,
                        reason: format!("time {} is before {}", step.at, last),
                    });
                }
                last = step.at;
                step.resolve(i)
            })
            .collect()
    }
}
