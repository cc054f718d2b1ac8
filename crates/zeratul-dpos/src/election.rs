//! Election engine
//!
//! Runs once per election cycle and resolves everything staged since the
//! previous run.
//!
//! ## Phases
//!
//! 1. Settle delegations: merge bonding stake, pay out unbonding stake,
//!    move redelegated stake, reset expired lock tiers. The weighted stake
//!    of the outgoing validator set is captured before anything changes
//!    and becomes the reward basis.
//! 2. Total every candidate's weighted stake plus weighted whitelist.
//! 3. Rank candidates (total descending, address ascending) and keep the
//!    top `validator_count`.
//! 4. Reward the outgoing set within the yearly budget.
//! 5. Convert totals to power and apply the power cap.
//! 6. Pay out unbonded tokens, drop unregistered candidates with no stake.
//! 7. Advance staged fee changes.
//!
//! The whole run executes against a store overlay; any error discards it.

use crate::error::{DposError, Result};
use crate::ledger::DelegationLedger;
use crate::power::apply_power_cap;
use crate::registry::CandidateRegistry;
use crate::rewards::{yearly_budget, RewardBasis, RewardCalculator, RewardDistribution};
use crate::state::Db;
use crate::store::KvStore;
use crate::token::TokenLedger;
use crate::types::*;
use num_bigint::BigUint;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Token transfer executed by an election
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub to: Address,
    pub amount: BigUint,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElectionReport {
    pub validators: Vec<Validator>,
    pub rewards_distributed: BigUint,
    pub payouts: Vec<Payout>,
    pub removed_candidates: Vec<Address>,
    pub fee_changes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// The cycle has not elapsed yet
    Skipped { next_election: Timestamp },
    Completed(ElectionReport),
}

pub struct ElectionEngine<'a, S, T> {
    db: &'a mut Db<S>,
    token: &'a mut T,
    contract: &'a Address,
}

impl<'a, S: KvStore, T: TokenLedger> ElectionEngine<'a, S, T> {
    pub fn new(db: &'a mut Db<S>, token: &'a mut T, contract: &'a Address) -> Self {
        Self { db, token, contract }
    }

    pub fn run(&mut self, now: Timestamp) -> Result<ElectionOutcome> {
        let mut state = self.db.state()?;
        let cycle = state.params.election_cycle_length;
        if state.last_election_time > 0 && now.saturating_sub(state.last_election_time) < cycle {
            return Ok(ElectionOutcome::Skipped {
                next_election: state.last_election_time + cycle,
            });
        }

        let outgoing: BTreeSet<Address> = state.validators.iter().map(|v| v.address.clone()).collect();

        let (bases, payouts) = self.settle_delegations(now, &outgoing)?;
        let totals = self.delegation_totals()?;
        let elected = self.rank(&totals, state.params.validator_count)?;
        let distribution = self.distribute_rewards(&mut state, now, &bases)?;
        let validators = Self::validator_set(&elected);

        self.update_statistics(&totals, &distribution)?;
        self.execute_payouts(&payouts)?;
        let removed_candidates = self.remove_unregistered()?;
        let fee_changes = CandidateRegistry::new(self.db).advance_fee_states()?;

        let rewards_distributed = distribution.total().clone();
        state.reward_year_distributed += &rewards_distributed;
        state.total_rewards_distributed += &rewards_distributed;
        state.total_validator_delegations = elected.iter().map(|(_, total)| total).sum();
        state.validators = validators.clone();
        state.last_election_time = now;
        self.db.set_state(&state)?;

        info!(
            "election at {}: {} validators, {} rewarded, {} payouts, {} candidates removed",
            now,
            validators.len(),
            rewards_distributed,
            payouts.len(),
            removed_candidates.len()
        );

        Ok(ElectionOutcome::Completed(ElectionReport {
            validators,
            rewards_distributed,
            payouts,
            removed_candidates,
            fee_changes,
        }))
    }

    /// Resolve staged changes on every delegation.
    ///
    /// Returns the pre-merge reward bases of the outgoing validators and the
    /// queued payouts.
    fn settle_delegations(
        &mut self,
        now: Timestamp,
        outgoing: &BTreeSet<Address>,
    ) -> Result<(BTreeMap<Address, Vec<RewardBasis>>, Vec<Payout>)> {
        let mut bases: BTreeMap<Address, Vec<RewardBasis>> = BTreeMap::new();
        let mut payouts = Vec::new();

        for mut delegation in self.db.delegations()? {
            if !delegation.is_reward_entry()
                && delegation.amount > BigUint::ZERO
                && outgoing.contains(&delegation.validator)
            {
                let referrer = match &delegation.referrer {
                    Some(name) => self.db.referrer(name)?,
                    None => None,
                };
                bases
                    .entry(delegation.validator.clone())
                    .or_default()
                    .push(RewardBasis {
                        delegator: delegation.delegator.clone(),
                        weighted: delegation.weighted_amount(),
                        referrer,
                    });
            }

            match delegation.state {
                DelegationState::Bonded => {}
                DelegationState::Bonding => {
                    delegation.amount += &delegation.update_amount;
                }
                DelegationState::Unbonding => {
                    let amount = (&delegation.update_amount).min(&delegation.amount).clone();
                    delegation.amount -= &amount;
                    if amount > BigUint::ZERO {
                        payouts.push(Payout {
                            to: delegation.delegator.clone(),
                            amount,
                        });
                    }
                }
                DelegationState::Redelegating => {
                    self.move_delegation(&mut delegation, now)?;
                }
            }

            delegation.update_amount = BigUint::ZERO;
            delegation.update_validator = None;
            delegation.update_locktime_tier = None;
            delegation.state = DelegationState::Bonded;
            reset_expired_tier(&mut delegation, now);

            let mut ledger = DelegationLedger::new(self.db);
            if delegation.is_drained() {
                ledger.remove(&delegation.validator, &delegation.delegator, delegation.index)?;
            } else {
                ledger.update(&delegation)?;
            }
        }

        Ok((bases, payouts))
    }

    /// Carry the staged part of a redelegating record to its target
    fn move_delegation(&mut self, delegation: &mut Delegation, now: Timestamp) -> Result<()> {
        let Some(target) = delegation.update_validator.clone() else {
            return Ok(());
        };
        if !target.is_limbo() {
            match self.db.candidate(&target)? {
                None => {
                    warn!(
                        "redelegation target {} vanished, keeping stake with {}",
                        target, delegation.validator
                    );
                    return Ok(());
                }
                Some(candidate) if candidate.is_unregistering() => {
                    warn!(
                        "redelegation target {} is unregistering, keeping stake with {}",
                        target, delegation.validator
                    );
                    return Ok(());
                }
                Some(_) => {}
            }
        }

        let moved = (&delegation.update_amount).min(&delegation.amount).clone();
        let mut tier = delegation.locktime_tier;
        let mut lock_time = delegation.lock_time;
        if let Some(new_tier) = delegation.update_locktime_tier {
            tier = tier.max(new_tier);
            lock_time = lock_time.max(now + new_tier.duration());
        }

        let mut ledger = DelegationLedger::new(self.db);
        let index = ledger.next_index(&target, &delegation.delegator)?;
        let mut moved_record = Delegation {
            amount: moved.clone(),
            locktime_tier: tier,
            lock_time,
            referrer: delegation.referrer.clone(),
            ..Delegation::empty(target.clone(), delegation.delegator.clone(), index)
        };
        reset_expired_tier(&mut moved_record, now);
        ledger.insert(&moved_record)?;

        delegation.amount -= &moved;
        debug!(
            "moved {} of {} from {} to {} (index {})",
            moved, delegation.delegator, delegation.validator, target, index
        );
        Ok(())
    }

    /// Weighted stake per validator, limbo excluded
    fn delegation_totals(&self) -> Result<BTreeMap<Address, BigUint>> {
        let mut totals: BTreeMap<Address, BigUint> = BTreeMap::new();
        for delegation in self.db.delegations()? {
            if delegation.is_reward_entry() || delegation.validator.is_limbo() {
                continue;
            }
            *totals.entry(delegation.validator.clone()).or_default() += delegation.weighted_amount();
        }
        for statistic in self.db.statistics()? {
            let whitelist = statistic.weighted_whitelist_amount();
            if whitelist > BigUint::ZERO {
                *totals.entry(statistic.address.clone()).or_default() += whitelist;
            }
        }
        Ok(totals)
    }

    fn rank(&self, totals: &BTreeMap<Address, BigUint>, validator_count: u64) -> Result<Vec<(Address, BigUint)>> {
        let mut ranked: Vec<(Address, BigUint)> = self
            .db
            .candidates()?
            .into_iter()
            .filter(|c| !c.is_unregistering())
            .filter_map(|c| {
                let total = totals.get(&c.address)?;
                (*total > BigUint::ZERO).then(|| (c.address, total.clone()))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(usize::try_from(validator_count).unwrap_or(usize::MAX));
        Ok(ranked)
    }

    fn distribute_rewards(
        &mut self,
        state: &mut ContractState,
        now: Timestamp,
        bases: &BTreeMap<Address, Vec<RewardBasis>>,
    ) -> Result<RewardDistribution> {
        let mut distribution = RewardDistribution::new();
        {
            let calculator = RewardCalculator::new(&state.params, &state.total_validator_delegations);
            for validator in &state.validators {
                let Some(candidate) = self.db.candidate(&validator.address)? else {
                    continue;
                };
                let whitelist = self.db.statistic(&validator.address)?;
                let validator_bases = bases.get(&validator.address).map(Vec::as_slice).unwrap_or(&[]);
                calculator.distribute(&candidate, validator_bases, whitelist.as_ref(), &mut distribution);
            }
        }

        let budget = yearly_budget(state, now);
        if distribution.total() > &budget {
            warn!(
                "yearly reward budget reached, scaling {} down to {}",
                distribution.total(),
                budget
            );
            distribution.limit_to(&budget);
        }

        let mut ledger = DelegationLedger::new(self.db);
        for (validator, delegator, amount) in distribution.credits() {
            ledger.credit_reward(validator, delegator, amount)?;
        }
        Ok(distribution)
    }

    fn validator_set(elected: &[(Address, BigUint)]) -> Vec<Validator> {
        let correction = BigUint::from(POWER_CORRECTION);
        let one = BigUint::from(1u32);
        let raw: Vec<BigUint> = elected
            .iter()
            .map(|(_, total)| (total / &correction).max(one.clone()))
            .collect();
        apply_power_cap(&raw)
            .into_iter()
            .zip(elected)
            .map(|(power, (address, total))| Validator {
                address: address.clone(),
                power,
                delegation_total: total.clone(),
            })
            .collect()
    }

    fn update_statistics(
        &mut self,
        totals: &BTreeMap<Address, BigUint>,
        distribution: &RewardDistribution,
    ) -> Result<()> {
        let mut statistics: BTreeMap<Address, ValidatorStatistic> = self
            .db
            .statistics()?
            .into_iter()
            .map(|s| (s.address.clone(), s))
            .collect();
        for candidate in self.db.candidates()? {
            statistics
                .entry(candidate.address.clone())
                .or_insert_with(|| ValidatorStatistic::new(candidate.address));
        }

        for (address, mut statistic) in statistics {
            statistic.delegation_total = totals.get(&address).cloned().unwrap_or_default();
            statistic.distribution_total = distribution.generated_by(&address);
            self.db.set_statistic(&address, &statistic)?;
        }
        Ok(())
    }

    fn execute_payouts(&mut self, payouts: &[Payout]) -> Result<()> {
        let total: BigUint = payouts.iter().map(|p| &p.amount).sum();
        let balance = self.token.balance_of(self.contract);
        if balance < total {
            warn!("contract balance {} cannot cover payouts of {}", balance, total);
            return Err(DposError::InsufficientBalance);
        }
        for payout in payouts {
            self.token.transfer(self.contract, &payout.to, &payout.amount)?;
        }
        Ok(())
    }

    fn remove_unregistered(&mut self) -> Result<Vec<Address>> {
        let mut removed = Vec::new();
        for candidate in self.db.candidates()? {
            if !candidate.is_unregistering() {
                continue;
            }
            if DelegationLedger::new(self.db).has_principal(&candidate.address)? {
                continue;
            }
            self.db.delete_candidate(&candidate.address)?;
            self.db.delete_statistic(&candidate.address)?;
            info!("removed candidate {}", candidate.address);
            removed.push(candidate.address);
        }
        Ok(removed)
    }
}

fn reset_expired_tier(delegation: &mut Delegation, now: Timestamp) {
    if !delegation.is_reward_entry() && now >= delegation.lock_time {
        delegation.locktime_tier = LocktimeTier::TwoWeeks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Overlay};
    use crate::token::MemoryToken;

    fn addr(b: u8) -> Address {
        Address::new("default", [b; 20])
    }

    fn contract() -> Address {
        Address::new("default", [0xdd; 20])
    }

    fn candidate(b: u8) -> Candidate {
        Candidate {
            address: addr(b),
            pubkey: vec![b; 32],
            fee: 0,
            new_fee: 0,
            state: CandidateState::Registered,
            max_referral_percentage: 0,
            name: String::new(),
            description: String::new(),
            website: String::new(),
        }
    }

    fn setup(candidates: &[u8], validator_count: u64) -> Db<MemoryStore> {
        let mut db = Db::new(MemoryStore::new());
        let mut state = ContractState::default();
        state.params.validator_count = validator_count;
        state.params.election_cycle_length = 0;
        db.set_state(&state).unwrap();
        for b in candidates {
            db.set_candidate(&candidate(*b)).unwrap();
        }
        db
    }

    fn stake(db: &mut Db<MemoryStore>, validator: u8, delegator: u8, amount: BigUint) {
        let mut ledger = DelegationLedger::new(db);
        let index = ledger.next_index(&addr(validator), &addr(delegator)).unwrap();
        ledger
            .insert(&Delegation {
                update_amount: amount,
                state: DelegationState::Bonding,
                lock_time: u64::MAX,
                ..Delegation::empty(addr(validator), addr(delegator), index)
            })
            .unwrap();
    }

    fn elect(db: &mut Db<MemoryStore>, token: &mut MemoryToken, now: u64) -> ElectionReport {
        let contract = contract();
        match ElectionEngine::new(db, token, &contract).run(now).unwrap() {
            ElectionOutcome::Completed(report) => report,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ranking_and_tiebreak() {
        let mut db = setup(&[1, 2, 3, 4], 2);
        let mut token = MemoryToken::new();
        stake(&mut db, 1, 9, tokens(10));
        stake(&mut db, 2, 9, tokens(30));
        stake(&mut db, 3, 9, tokens(30));
        // no stake for 4

        let report = elect(&mut db, &mut token, 100);
        let elected: Vec<_> = report.validators.iter().map(|v| v.address.clone()).collect();
        assert_eq!(elected, vec![addr(2), addr(3)]);
    }

    #[test]
    fn test_bonding_merges_once() {
        let mut db = setup(&[1], 21);
        let mut token = MemoryToken::new();
        stake(&mut db, 1, 9, tokens(10));

        elect(&mut db, &mut token, 100);
        elect(&mut db, &mut token, 200);
        let d = db.delegation(&addr(1), &addr(9), 1).unwrap().unwrap();
        assert_eq!(d.amount, tokens(10));
        assert_eq!(d.update_amount, BigUint::ZERO);
        assert_eq!(d.state, DelegationState::Bonded);
    }

    #[test]
    fn test_skipped_before_cycle() {
        let mut db = setup(&[1], 21);
        let mut state = db.state().unwrap();
        state.params.election_cycle_length = 600;
        db.set_state(&state).unwrap();
        let mut token = MemoryToken::new();

        elect(&mut db, &mut token, 1_000);
        let contract = contract();
        let outcome = ElectionEngine::new(&mut db, &mut token, &contract).run(1_599).unwrap();
        assert_eq!(outcome, ElectionOutcome::Skipped { next_election: 1_600 });
        assert!(matches!(
            ElectionEngine::new(&mut db, &mut token, &contract).run(1_600).unwrap(),
            ElectionOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_payout_needs_balance() {
        let mut db = setup(&[1], 21);
        let mut token = MemoryToken::new();
        let mut d = Delegation::empty(addr(1), addr(9), 1);
        d.amount = tokens(5);
        d.update_amount = tokens(5);
        d.state = DelegationState::Unbonding;
        DelegationLedger::new(&mut db).insert(&d).unwrap();

        let contract = contract();
        let store = db.into_inner();
        {
            // failed run leaves the backing store untouched
            let mut scratch = Db::new(Overlay::new(&store));
            let err = ElectionEngine::new(&mut scratch, &mut token, &contract).run(10).unwrap_err();
            assert!(matches!(err, DposError::InsufficientBalance));
        }
        let mut db = Db::new(store);
        assert!(db.delegation(&addr(1), &addr(9), 1).unwrap().is_some());

        token.mint(&contract, &tokens(5));
        let report = elect(&mut db, &mut token, 10);
        assert_eq!(report.payouts, vec![Payout { to: addr(9), amount: tokens(5) }]);
        assert_eq!(token.balance_of(&addr(9)), tokens(5));
        assert!(db.delegation(&addr(1), &addr(9), 1).unwrap().is_none());
        assert_eq!(db.delegation_count().unwrap(), 0);
    }

    #[test]
    fn test_tier_reset_after_lock() {
        let mut db = setup(&[1], 21);
        let mut token = MemoryToken::new();
        let d = Delegation {
            amount: tokens(5),
            locktime_tier: LocktimeTier::OneYear,
            lock_time: 500,
            ..Delegation::empty(addr(1), addr(9), 1)
        };
        DelegationLedger::new(&mut db).insert(&d).unwrap();

        elect(&mut db, &mut token, 499);
        assert_eq!(
            db.delegation(&addr(1), &addr(9), 1).unwrap().unwrap().locktime_tier,
            LocktimeTier::OneYear
        );
        elect(&mut db, &mut token, 500);
        assert_eq!(
            db.delegation(&addr(1), &addr(9), 1).unwrap().unwrap().locktime_tier,
            LocktimeTier::TwoWeeks
        );
    }

    #[test]
    fn test_partial_redelegation() {
        let mut db = setup(&[1, 2], 21);
        let mut token = MemoryToken::new();
        let d = Delegation {
            amount: tokens(10),
            update_amount: tokens(4),
            state: DelegationState::Redelegating,
            update_validator: Some(addr(2)),
            update_locktime_tier: Some(LocktimeTier::SixMonths),
            lock_time: 50,
            ..Delegation::empty(addr(1), addr(9), 1)
        };
        DelegationLedger::new(&mut db).insert(&d).unwrap();

        elect(&mut db, &mut token, 100);
        let source = db.delegation(&addr(1), &addr(9), 1).unwrap().unwrap();
        let moved = db.delegation(&addr(2), &addr(9), 1).unwrap().unwrap();
        assert_eq!(source.amount, tokens(6));
        assert_eq!(moved.amount, tokens(4));
        assert_eq!(moved.locktime_tier, LocktimeTier::SixMonths);
        assert_eq!(moved.lock_time, 100 + LocktimeTier::SixMonths.duration());
        assert_eq!(db.delegation_count().unwrap(), 2);
    }

    #[test]
    fn test_redelegation_to_unregistering_keeps_stake() {
        let mut db = setup(&[1, 2], 21);
        let mut token = MemoryToken::new();
        let mut target = db.candidate(&addr(2)).unwrap().unwrap();
        target.state = CandidateState::Unregistering;
        db.set_candidate(&target).unwrap();
        let d = Delegation {
            amount: tokens(10),
            update_amount: tokens(10),
            state: DelegationState::Redelegating,
            update_validator: Some(addr(2)),
            lock_time: u64::MAX,
            ..Delegation::empty(addr(1), addr(9), 1)
        };
        DelegationLedger::new(&mut db).insert(&d).unwrap();

        let report = elect(&mut db, &mut token, 100);
        let source = db.delegation(&addr(1), &addr(9), 1).unwrap().unwrap();
        assert_eq!(source.amount, tokens(10));
        assert_eq!(source.state, DelegationState::Bonded);
        assert!(db.delegations_to(&addr(2)).unwrap().is_empty());
        assert_eq!(report.removed_candidates, vec![addr(2)]);
        assert_eq!(report.validators[0].address, addr(1));
        assert_eq!(db.delegation_count().unwrap(), 1);
    }

    #[test]
    fn test_unregistered_candidate_removed_when_empty() {
        let mut db = setup(&[1, 2], 21);
        let mut token = MemoryToken::new();
        stake(&mut db, 2, 9, tokens(1));
        for b in [1u8, 2] {
            let mut c = db.candidate(&addr(b)).unwrap().unwrap();
            c.state = CandidateState::Unregistering;
            db.set_candidate(&c).unwrap();
        }

        let report = elect(&mut db, &mut token, 100);
        assert_eq!(report.removed_candidates, vec![addr(1)]);
        assert!(report.validators.is_empty());
        assert!(db.candidate(&addr(2)).unwrap().is_some());
    }

    #[test]
    fn test_whitelist_counts_toward_total() {
        let mut db = setup(&[1, 2], 21);
        let mut token = MemoryToken::new();
        stake(&mut db, 2, 9, tokens(100));
        let mut stat = ValidatorStatistic::new(addr(1));
        stat.whitelist_amount = tokens(50);
        stat.whitelist_locktime_tier = LocktimeTier::OneYear;
        db.set_statistic(&addr(1), &stat).unwrap();

        let report = elect(&mut db, &mut token, 100);
        assert_eq!(report.validators[0].address, addr(1));
        assert_eq!(report.validators[0].delegation_total, tokens(200));
        assert_eq!(report.validators[0].power, tokens(200) / BigUint::from(POWER_CORRECTION));
        assert_eq!(db.statistic(&addr(2)).unwrap().unwrap().delegation_total, tokens(100));
    }
}
