//! Read-only contract queries
//!
//! Absent records read as zero-valued results rather than errors.

use crate::error::Result;
use crate::state::Db;
use crate::store::KvRead;
use crate::types::*;
use num_bigint::BigUint;
use std::collections::BTreeMap;

/// Candidate plus its election bookkeeping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateInfo {
    pub candidate: Candidate,
    pub statistic: ValidatorStatistic,
}

/// Elected validator with its statistic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub address: Address,
    pub power: BigUint,
    pub delegation_total: BigUint,
    pub whitelist_amount: BigUint,
    pub distribution_total: BigUint,
}

/// Sum over a set of delegations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DelegationSummary {
    /// Principal, live plus pending bonds
    pub amount: BigUint,
    pub weighted_amount: BigUint,
    pub delegations: Vec<Delegation>,
}

impl DelegationSummary {
    fn from_delegations(delegations: Vec<Delegation>) -> Self {
        let mut summary = Self::default();
        for delegation in &delegations {
            if delegation.is_reward_entry() {
                continue;
            }
            // outgoing update_amount is still inside amount until settled
            let principal = match delegation.state {
                DelegationState::Bonding => &delegation.amount + &delegation.update_amount,
                _ => delegation.amount.clone(),
            };
            summary.weighted_amount += weighted_amount(&principal, delegation.locktime_tier);
            summary.amount += principal;
        }
        summary.delegations = delegations;
        summary
    }
}

/// Every delegation bound to one validator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorDelegations {
    pub validator: Address,
    pub delegation_total: BigUint,
    pub delegations: Vec<Delegation>,
}

pub struct Queries<S> {
    db: Db<S>,
}

impl<S: KvRead> Queries<S> {
    pub fn new(db: Db<S>) -> Self {
        Self { db }
    }

    pub fn state(&self) -> Result<ContractState> {
        self.db.state()
    }

    pub fn list_candidates(&self) -> Result<Vec<CandidateInfo>> {
        self.db
            .candidates()?
            .into_iter()
            .map(|candidate| {
                let statistic = self
                    .db
                    .statistic(&candidate.address)?
                    .unwrap_or_else(|| ValidatorStatistic::new(candidate.address.clone()));
                Ok(CandidateInfo { candidate, statistic })
            })
            .collect()
    }

    pub fn list_validators(&self) -> Result<Vec<ValidatorInfo>> {
        self.db
            .state()?
            .validators
            .into_iter()
            .map(|validator| {
                let statistic = self
                    .db
                    .statistic(&validator.address)?
                    .unwrap_or_else(|| ValidatorStatistic::new(validator.address.clone()));
                Ok(ValidatorInfo {
                    address: validator.address,
                    power: validator.power,
                    delegation_total: validator.delegation_total,
                    whitelist_amount: statistic.whitelist_amount,
                    distribution_total: statistic.distribution_total,
                })
            })
            .collect()
    }

    /// All delegations of `delegator` to `validator`, reward entry included
    pub fn check_delegation(&self, validator: &Address, delegator: &Address) -> Result<DelegationSummary> {
        Ok(DelegationSummary::from_delegations(
            self.db.delegations_of(validator, delegator)?,
        ))
    }

    pub fn check_delegation_by_index(
        &self,
        validator: &Address,
        delegator: &Address,
        index: DelegationIndex,
    ) -> Result<Delegation> {
        Ok(self
            .db
            .delegation(validator, delegator, index)?
            .unwrap_or_else(|| Delegation::empty(validator.clone(), delegator.clone(), index)))
    }

    pub fn check_reward_delegation(&self, validator: &Address, delegator: &Address) -> Result<Delegation> {
        self.check_delegation_by_index(validator, delegator, REWARD_DELEGATION_INDEX)
    }

    /// Every delegation of `delegator` across validators
    pub fn check_all_delegations(&self, delegator: &Address) -> Result<DelegationSummary> {
        let delegations = self
            .db
            .delegations()?
            .into_iter()
            .filter(|d| &d.delegator == delegator)
            .collect();
        Ok(DelegationSummary::from_delegations(delegations))
    }

    /// Delegations grouped by candidate, then limbo
    pub fn list_all_delegations(&self) -> Result<Vec<ValidatorDelegations>> {
        let mut grouped: BTreeMap<Address, Vec<Delegation>> = self
            .db
            .candidates()?
            .into_iter()
            .map(|c| (c.address, Vec::new()))
            .collect();
        for delegation in self.db.delegations()? {
            grouped
                .entry(delegation.validator.clone())
                .or_default()
                .push(delegation);
        }

        Ok(grouped
            .into_iter()
            .map(|(validator, delegations)| ValidatorDelegations {
                delegation_total: delegations
                    .iter()
                    .filter(|d| !d.is_reward_entry())
                    .map(|d| &d.amount)
                    .sum(),
                validator,
                delegations,
            })
            .collect())
    }

    /// Rewards distributed since genesis
    pub fn check_rewards(&self) -> Result<BigUint> {
        Ok(self.db.state()?.total_rewards_distributed)
    }

    pub fn delegations_count(&self) -> Result<u64> {
        self.db.delegation_count()
    }

    pub fn candidate(&self, addr: &Address) -> Result<Option<Candidate>> {
        self.db.candidate(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn addr(b: u8) -> Address {
        Address::new("default", [b; 20])
    }

    #[test]
    fn test_absent_keys_are_zero() {
        let q = Queries::new(Db::new(MemoryStore::new()));

        let d = q.check_delegation_by_index(&addr(1), &addr(2), 7).unwrap();
        assert_eq!(d.amount, BigUint::ZERO);
        assert_eq!(d.index, 7);
        assert_eq!(q.check_reward_delegation(&addr(1), &addr(2)).unwrap().amount, BigUint::ZERO);
        assert_eq!(q.check_delegation(&addr(1), &addr(2)).unwrap(), DelegationSummary::default());
        assert_eq!(q.check_rewards().unwrap(), BigUint::ZERO);
        assert_eq!(q.delegations_count().unwrap(), 0);
        assert!(q.list_validators().unwrap().is_empty());
    }

    #[test]
    fn test_check_all_delegations_weighted() {
        let mut db = Db::new(MemoryStore::new());
        let bonded = Delegation {
            amount: tokens(10),
            locktime_tier: LocktimeTier::OneYear,
            ..Delegation::empty(addr(1), addr(9), 1)
        };
        let pending = Delegation {
            update_amount: tokens(5),
            state: DelegationState::Bonding,
            ..Delegation::empty(addr(2), addr(9), 1)
        };
        let reward = Delegation {
            amount: tokens(1),
            ..Delegation::empty(addr(1), addr(9), 0)
        };
        let other = Delegation {
            amount: tokens(100),
            ..Delegation::empty(addr(1), addr(8), 1)
        };
        for d in [&bonded, &pending, &reward, &other] {
            db.set_delegation(d).unwrap();
        }

        let q = Queries::new(db);
        let summary = q.check_all_delegations(&addr(9)).unwrap();
        assert_eq!(summary.amount, tokens(15));
        assert_eq!(summary.weighted_amount, tokens(45));
        assert_eq!(summary.delegations.len(), 3);

        let all = q.list_all_delegations().unwrap();
        let v1 = all.iter().find(|g| g.validator == addr(1)).unwrap();
        assert_eq!(v1.delegation_total, tokens(110));
        assert_eq!(v1.delegations.len(), 3);
    }

    #[test]
    fn test_pending_withdrawals_not_double_counted() {
        let mut db = Db::new(MemoryStore::new());
        let unbonding = Delegation {
            amount: tokens(10),
            update_amount: tokens(4),
            state: DelegationState::Unbonding,
            ..Delegation::empty(addr(1), addr(9), 1)
        };
        let redelegating = Delegation {
            amount: tokens(7),
            update_amount: tokens(7),
            update_validator: Some(addr(3)),
            state: DelegationState::Redelegating,
            ..Delegation::empty(addr(2), addr(9), 1)
        };
        db.set_delegation(&unbonding).unwrap();
        db.set_delegation(&redelegating).unwrap();

        let q = Queries::new(db);
        let summary = q.check_delegation(&addr(1), &addr(9)).unwrap();
        assert_eq!(summary.amount, tokens(10));
        assert_eq!(summary.weighted_amount, tokens(10));

        let summary = q.check_delegation(&addr(2), &addr(9)).unwrap();
        assert_eq!(summary.amount, tokens(7));

        let summary = q.check_all_delegations(&addr(9)).unwrap();
        assert_eq!(summary.amount, tokens(17));
        assert_eq!(summary.weighted_amount, tokens(17));
    }
}
