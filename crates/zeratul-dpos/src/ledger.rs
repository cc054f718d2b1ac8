//! Delegation ledger
//!
//! Records are keyed by (validator, delegator, index). Index 0 of each pair
//! holds accrued rewards; every `delegate` call opens a fresh index from 1
//! upwards. Ordinary calls only stage changes (`update_amount` plus a
//! pending state); the election merges them.

use crate::error::{DposError, Result};
use crate::state::Db;
use crate::store::KvStore;
use crate::token::TokenLedger;
use crate::types::*;
use num_bigint::BigUint;
use tracing::{debug, info};

pub struct DelegationLedger<'a, S> {
    db: &'a mut Db<S>,
}

impl<'a, S: KvStore> DelegationLedger<'a, S> {
    pub fn new(db: &'a mut Db<S>) -> Self {
        Self { db }
    }

    pub fn get(
        &self,
        validator: &Address,
        delegator: &Address,
        index: DelegationIndex,
    ) -> Result<Option<Delegation>> {
        self.db.delegation(validator, delegator, index)
    }

    fn require(
        &self,
        validator: &Address,
        delegator: &Address,
        index: DelegationIndex,
    ) -> Result<Delegation> {
        self.get(validator, delegator, index)?
            .ok_or_else(|| DposError::DelegationNotFound {
                validator: validator.clone(),
                delegator: delegator.clone(),
                index,
            })
    }

    /// Smallest unused principal index of a pair
    pub fn next_index(&self, validator: &Address, delegator: &Address) -> Result<DelegationIndex> {
        let last = self
            .db
            .delegations_of(validator, delegator)?
            .last()
            .map(|d| d.index)
            .unwrap_or(REWARD_DELEGATION_INDEX);
        Ok(last + 1)
    }

    /// Store a record under a key that was free
    pub fn insert(&mut self, delegation: &Delegation) -> Result<()> {
        let count = self.db.delegation_count()?;
        self.db.set_delegation(delegation)?;
        self.db.set_delegation_count(count + 1)
    }

    pub fn update(&mut self, delegation: &Delegation) -> Result<()> {
        self.db.set_delegation(delegation)
    }

    pub fn remove(&mut self, validator: &Address, delegator: &Address, index: DelegationIndex) -> Result<()> {
        if self.get(validator, delegator, index)?.is_none() {
            return Ok(());
        }
        let count = self.db.delegation_count()?;
        self.db.delete_delegation(validator, delegator, index)?;
        self.db.set_delegation_count(count.saturating_sub(1))
    }

    /// Add `amount` to the reward entry of a pair, creating it if needed
    pub fn credit_reward(&mut self, validator: &Address, delegator: &Address, amount: &BigUint) -> Result<()> {
        match self.get(validator, delegator, REWARD_DELEGATION_INDEX)? {
            Some(mut entry) => {
                entry.amount += amount;
                self.update(&entry)
            }
            None => {
                let mut entry = Delegation::empty(validator.clone(), delegator.clone(), REWARD_DELEGATION_INDEX);
                entry.amount = amount.clone();
                self.insert(&entry)
            }
        }
    }

    /// Whether any principal (live or pending) is still bound to `validator`
    pub fn has_principal(&self, validator: &Address) -> Result<bool> {
        Ok(self
            .db
            .delegations_to(validator)?
            .iter()
            .any(|d| !d.is_reward_entry() && !d.is_drained()))
    }

    /// Bond `amount` to `validator`, pulling tokens from the sender.
    ///
    /// Returns the index of the new delegation.
    #[allow(clippy::too_many_arguments)]
    pub fn delegate<T: TokenLedger>(
        &mut self,
        token: &mut T,
        contract: &Address,
        ctx: &CallContext,
        validator: &Address,
        amount: &BigUint,
        tier: LocktimeTier,
        referrer: Option<String>,
    ) -> Result<DelegationIndex> {
        if *amount == BigUint::ZERO {
            return Err(DposError::ZeroAmount);
        }
        let candidate = self
            .db
            .candidate(validator)?
            .ok_or_else(|| DposError::CandidateNotFound(validator.clone()))?;
        if candidate.is_unregistering() {
            return Err(DposError::CandidateUnregistering(validator.clone()));
        }
        if let Some(name) = &referrer {
            if self.db.referrer(name)?.is_none() {
                return Err(DposError::ReferrerNotFound(name.clone()));
            }
        }

        token.transfer_from(contract, &ctx.sender, contract, amount)?;

        let index = self.next_index(validator, &ctx.sender)?;
        let delegation = Delegation {
            update_amount: amount.clone(),
            locktime_tier: tier,
            lock_time: ctx.now + tier.duration(),
            state: DelegationState::Bonding,
            referrer,
            ..Delegation::empty(validator.clone(), ctx.sender.clone(), index)
        };
        self.insert(&delegation)?;

        info!(
            "{} delegated {} to {} (index {}, tier {:?})",
            ctx.sender, amount, validator, index, tier
        );
        Ok(index)
    }

    /// Stage a move of bonded principal to another validator or limbo
    pub fn redelegate(
        &mut self,
        ctx: &CallContext,
        from: &Address,
        to: &Address,
        amount: &BigUint,
        index: DelegationIndex,
        new_tier: Option<LocktimeTier>,
    ) -> Result<()> {
        if *amount == BigUint::ZERO {
            return Err(DposError::ZeroAmount);
        }
        if index == REWARD_DELEGATION_INDEX {
            return Err(DposError::InvalidIndex(index));
        }
        if from == to {
            return Err(DposError::SameValidator);
        }
        if !to.is_limbo() {
            let target = self
                .db
                .candidate(to)?
                .ok_or_else(|| DposError::CandidateNotFound(to.clone()))?;
            if target.is_unregistering() {
                return Err(DposError::CandidateUnregistering(to.clone()));
            }
        }

        let mut delegation = self.require(from, &ctx.sender, index)?;
        if delegation.state != DelegationState::Bonded {
            return Err(DposError::DelegationNotBonded);
        }
        if *amount > delegation.amount {
            return Err(DposError::AmountTooLarge {
                available: delegation.amount.to_string(),
            });
        }

        delegation.state = DelegationState::Redelegating;
        delegation.update_amount = amount.clone();
        delegation.update_validator = Some(to.clone());
        delegation.update_locktime_tier = new_tier;
        self.update(&delegation)?;

        debug!("{} redelegating {} from {} to {}", ctx.sender, amount, from, to);
        Ok(())
    }

    /// Stage a payout. On the reward entry an amount of zero claims
    /// everything accrued.
    pub fn unbond(
        &mut self,
        ctx: &CallContext,
        validator: &Address,
        amount: &BigUint,
        index: DelegationIndex,
    ) -> Result<()> {
        let mut delegation = self.require(validator, &ctx.sender, index)?;
        if delegation.state != DelegationState::Bonded {
            return Err(DposError::DelegationNotBonded);
        }

        let payout = if delegation.is_reward_entry() {
            if *amount == BigUint::ZERO {
                delegation.amount.clone()
            } else {
                amount.clone()
            }
        } else {
            if *amount == BigUint::ZERO {
                return Err(DposError::ZeroAmount);
            }
            if ctx.now < delegation.lock_time {
                return Err(DposError::StillLocked {
                    lock_time: delegation.lock_time,
                });
            }
            amount.clone()
        };

        if payout == BigUint::ZERO {
            return Err(DposError::ZeroAmount);
        }
        if payout > delegation.amount {
            return Err(DposError::AmountTooLarge {
                available: delegation.amount.to_string(),
            });
        }

        delegation.state = DelegationState::Unbonding;
        delegation.update_amount = payout;
        self.update(&delegation)?;

        debug!("{} unbonding index {} from {}", ctx.sender, index, validator);
        Ok(())
    }
}
