//! Reward calculation
//!
//! Rewards accrue per election cycle at a base rate of 5% a year on the
//! tier-weighted stake, so a one-year lock (4x weight) earns 20%. When 5% of
//! the elected set's stake would exceed `max_yearly_reward` every reward is
//! scaled down proportionally, and a running per-year budget stops the
//! cumulative payout from ever passing `max_yearly_reward`.
//!
//! ## Split of one delegation's reward
//!
//! ```text
//! reward          = cycle_reward(amount * tier_weight)
//! validator_cut   = reward * fee / 10000
//! referrer_cut    = validator_cut * max_referral_percentage / 10000   (if referred)
//! delegator       = reward - validator_cut
//! validator       = validator_cut - referrer_cut
//! ```
//!
//! Credits land on index 0 of the (validator, delegator) pair. Referrers
//! are credited under the limbo validator.

use crate::types::*;
use num_bigint::BigUint;
use std::collections::BTreeMap;

/// Base yearly reward rate (5%)
pub const BASE_REWARD_BPS: u64 = 500;

/// Cycle length assumed when `election_cycle_length` is zero
pub const DEFAULT_CYCLE_SECONDS: u64 = 2;

/// Reward earned over one cycle by `weighted` stake
pub fn calculate_rewards(
    weighted: &BigUint,
    params: &Params,
    total_validator_delegations: &BigUint,
) -> BigUint {
    let mut reward = fraction(BASE_REWARD_BPS, weighted);

    let yearly_total = fraction(BASE_REWARD_BPS, total_validator_delegations);
    if yearly_total > params.max_yearly_reward {
        reward = reward * &params.max_yearly_reward / yearly_total;
    }

    let cycle_seconds = match params.election_cycle_length {
        0 => DEFAULT_CYCLE_SECONDS,
        secs => secs,
    };
    reward * BigUint::from(cycle_seconds) / BigUint::from(YEAR_SECONDS)
}

/// Stake of one delegation as seen by the reward pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardBasis {
    pub delegator: Address,
    /// Tier-weighted principal before this election's merge
    pub weighted: BigUint,
    pub referrer: Option<Address>,
}

/// How a single reward is divided
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewardSplit {
    pub delegator: BigUint,
    pub validator: BigUint,
    pub referrer: BigUint,
}

pub fn split_reward(reward: &BigUint, fee: u64, max_referral_percentage: u64, referred: bool) -> RewardSplit {
    let validator_cut = fraction(fee, reward);
    let referrer = if referred {
        fraction(max_referral_percentage, &validator_cut)
    } else {
        BigUint::ZERO
    };
    RewardSplit {
        delegator: reward - &validator_cut,
        validator: &validator_cut - &referrer,
        referrer,
    }
}

/// Credits staged during one election
#[derive(Clone, Debug, Default)]
pub struct RewardDistribution {
    /// (validator, delegator) -> reward
    credits: BTreeMap<(Address, Address), BigUint>,
    /// validator -> total reward generated by its stake
    generated: BTreeMap<Address, BigUint>,
    total: BigUint,
}

impl RewardDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, validator: &Address, delegator: &Address, amount: &BigUint) {
        if *amount == BigUint::ZERO {
            return;
        }
        *self
            .credits
            .entry((validator.clone(), delegator.clone()))
            .or_default() += amount;
        self.total += amount;
    }

    fn record_generated(&mut self, validator: &Address, amount: &BigUint) {
        *self.generated.entry(validator.clone()).or_default() += amount;
    }

    pub fn total(&self) -> &BigUint {
        &self.total
    }

    pub fn generated_by(&self, validator: &Address) -> BigUint {
        self.generated.get(validator).cloned().unwrap_or_default()
    }

    /// Scale every credit so the total fits in `budget`
    pub fn limit_to(&mut self, budget: &BigUint) {
        if self.total <= *budget {
            return;
        }
        let total = std::mem::take(&mut self.total);
        for amount in self.credits.values_mut() {
            *amount = &*amount * budget / &total;
            self.total += &*amount;
        }
        for amount in self.generated.values_mut() {
            *amount = &*amount * budget / &total;
        }
        self.credits.retain(|_, amount| *amount != BigUint::ZERO);
    }

    pub fn credits(&self) -> impl Iterator<Item = (&Address, &Address, &BigUint)> {
        self.credits.iter().map(|((v, d), amount)| (v, d, amount))
    }

    pub fn is_empty(&self) -> bool {
        self.credits.is_empty()
    }
}

/// Sizes and splits rewards for one election
pub struct RewardCalculator<'a> {
    params: &'a Params,
    total_validator_delegations: &'a BigUint,
}

impl<'a> RewardCalculator<'a> {
    pub fn new(params: &'a Params, total_validator_delegations: &'a BigUint) -> Self {
        Self {
            params,
            total_validator_delegations,
        }
    }

    pub fn cycle_reward(&self, weighted: &BigUint) -> BigUint {
        calculate_rewards(weighted, self.params, self.total_validator_delegations)
    }

    /// Stage the rewards of one validator's stake
    pub fn distribute(
        &self,
        candidate: &Candidate,
        bases: &[RewardBasis],
        whitelist: Option<&ValidatorStatistic>,
        distribution: &mut RewardDistribution,
    ) {
        let validator = &candidate.address;
        let limbo = Address::limbo();

        for basis in bases {
            let reward = self.cycle_reward(&basis.weighted);
            if reward == BigUint::ZERO {
                continue;
            }
            distribution.record_generated(validator, &reward);

            let split = split_reward(
                &reward,
                candidate.fee,
                candidate.max_referral_percentage,
                basis.referrer.is_some(),
            );
            distribution.credit(validator, &basis.delegator, &split.delegator);
            distribution.credit(validator, validator, &split.validator);
            if let Some(referrer) = &basis.referrer {
                distribution.credit(&limbo, referrer, &split.referrer);
            }
        }

        if let Some(statistic) = whitelist {
            let reward = self.cycle_reward(&statistic.weighted_whitelist_amount());
            distribution.record_generated(validator, &reward);
            distribution.credit(validator, validator, &reward);
        }
    }
}

/// Remaining reward budget of the current reward year, rolling the year
/// over when it has elapsed
pub fn yearly_budget(state: &mut ContractState, now: Timestamp) -> BigUint {
    let elapsed = match state.reward_year_start {
        Some(start) => now >= start.saturating_add(YEAR_SECONDS),
        None => true,
    };
    if elapsed {
        state.reward_year_start = Some(now);
        state.reward_year_distributed = BigUint::ZERO;
    }
    if state.reward_year_distributed >= state.params.max_yearly_reward {
        BigUint::ZERO
    } else {
        &state.params.max_yearly_reward - &state.reward_year_distributed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::new("default", [b; 20])
    }

    fn params(cycle: u64) -> Params {
        Params {
            election_cycle_length: cycle,
            ..Params::default()
        }
    }

    fn candidate(b: u8, fee: u64, referral: u64) -> Candidate {
        Candidate {
            address: addr(b),
            pubkey: vec![b; 32],
            fee,
            new_fee: fee,
            state: CandidateState::Registered,
            max_referral_percentage: referral,
            name: String::new(),
            description: String::new(),
            website: String::new(),
        }
    }

    #[test]
    fn test_calculate_rewards_reference() {
        let reward = calculate_rewards(&tokens(1000), &params(2), &BigUint::ZERO);
        assert_eq!(reward, BigUint::from(3_170_979_198_376u64));
    }

    #[test]
    fn test_zero_cycle_uses_default() {
        assert_eq!(
            calculate_rewards(&tokens(1000), &params(0), &BigUint::ZERO),
            calculate_rewards(&tokens(1000), &params(2), &BigUint::ZERO)
        );
    }

    #[test]
    fn test_full_year_is_five_percent() {
        let reward = calculate_rewards(&tokens(100), &params(YEAR_SECONDS), &BigUint::ZERO);
        assert_eq!(reward, tokens(5));
    }

    #[test]
    fn test_max_yearly_reward_scales() {
        // 5% of 2B tokens = 100M > 60M cap, rewards scale by 0.6
        let p = params(YEAR_SECONDS);
        let reward = calculate_rewards(&tokens(100), &p, &tokens(2_000_000_000));
        assert_eq!(reward, tokens(3));
    }

    #[test]
    fn test_tier_weighting_four_times() {
        let p = params(600);
        let total = BigUint::ZERO;
        let calc = RewardCalculator::new(&p, &total);
        let amount = tokens(1000);
        let low = calc.cycle_reward(&weighted_amount(&amount, LocktimeTier::TwoWeeks));
        let high = calc.cycle_reward(&weighted_amount(&amount, LocktimeTier::OneYear));
        let diff = if high > &low * 4u32 { &high - &low * 4u32 } else { &low * 4u32 - &high };
        assert!(diff <= BigUint::from(4u32));
    }

    #[test]
    fn test_split_reward() {
        let split = split_reward(&BigUint::from(10_000u32), 1_000, 5_000, true);
        assert_eq!(split.delegator, BigUint::from(9_000u32));
        assert_eq!(split.validator, BigUint::from(500u32));
        assert_eq!(split.referrer, BigUint::from(500u32));

        let split = split_reward(&BigUint::from(10_000u32), 1_000, 5_000, false);
        assert_eq!(split.validator, BigUint::from(1_000u32));
        assert_eq!(split.referrer, BigUint::ZERO);
    }

    #[test]
    fn test_distribute_with_referrer_and_whitelist() {
        let p = params(YEAR_SECONDS);
        let total = BigUint::ZERO;
        let calc = RewardCalculator::new(&p, &total);
        let validator = candidate(1, 1_000, 5_000);
        let bases = vec![RewardBasis {
            delegator: addr(2),
            weighted: tokens(100),
            referrer: Some(addr(3)),
        }];
        let mut whitelist = ValidatorStatistic::new(addr(1));
        whitelist.whitelist_amount = tokens(100);
        whitelist.whitelist_locktime_tier = LocktimeTier::OneYear;

        let mut dist = RewardDistribution::new();
        calc.distribute(&validator, &bases, Some(&whitelist), &mut dist);

        let credits: Vec<_> = dist.credits().map(|(v, d, a)| (v.clone(), d.clone(), a.clone())).collect();
        // delegator 5 * 0.9, validator 0.5 * 0.5 + whitelist 20, referrer 0.25
        assert!(credits.contains(&(addr(1), addr(2), tokens(45) / 10u32)));
        assert!(credits.contains(&(addr(1), addr(1), tokens(20) + tokens(25) / 100u32)));
        assert!(credits.contains(&(Address::limbo(), addr(3), tokens(25) / 100u32)));
        assert_eq!(dist.total(), &tokens(25));
        assert_eq!(dist.generated_by(&addr(1)), tokens(25));
    }

    #[test]
    fn test_limit_to_budget() {
        let mut dist = RewardDistribution::new();
        dist.credit(&addr(1), &addr(2), &BigUint::from(300u32));
        dist.credit(&addr(1), &addr(1), &BigUint::from(100u32));
        dist.limit_to(&BigUint::from(200u32));
        assert_eq!(dist.total(), &BigUint::from(200u32));

        dist.limit_to(&BigUint::ZERO);
        assert!(dist.is_empty());
        assert_eq!(dist.total(), &BigUint::ZERO);
    }

    #[test]
    fn test_yearly_budget_rollover() {
        let mut state = ContractState::default();
        state.params.max_yearly_reward = BigUint::from(1_000u32);

        assert_eq!(yearly_budget(&mut state, 100), BigUint::from(1_000u32));
        state.reward_year_distributed = BigUint::from(1_000u32);
        assert_eq!(yearly_budget(&mut state, 200), BigUint::ZERO);

        assert_eq!(yearly_budget(&mut state, 100 + YEAR_SECONDS), BigUint::from(1_000u32));
        assert_eq!(state.reward_year_start, Some(100 + YEAR_SECONDS));
    }

    #[test]
    fn test_yearly_budget_year_starting_at_zero() {
        let mut state = ContractState::default();
        state.params.max_yearly_reward = BigUint::from(1_000u32);

        assert_eq!(yearly_budget(&mut state, 0), BigUint::from(1_000u32));
        assert_eq!(state.reward_year_start, Some(0));
        state.reward_year_distributed = BigUint::from(600u32);

        assert_eq!(yearly_budget(&mut state, 0), BigUint::from(400u32));
        assert_eq!(yearly_budget(&mut state, 10), BigUint::from(400u32));
        assert_eq!(state.reward_year_start, Some(0));

        assert_eq!(yearly_budget(&mut state, YEAR_SECONDS), BigUint::from(1_000u32));
        assert_eq!(state.reward_year_start, Some(YEAR_SECONDS));
    }
}
