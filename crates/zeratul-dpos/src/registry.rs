//! Candidate registry
//!
//! Registration, whitelisting, fee changes and referrers. A candidate that
//! is not whitelisted locks `registration_requirement` as a self-delegation
//! when it registers.

use crate::error::{DposError, Result};
use crate::ledger::DelegationLedger;
use crate::roles::{require_role, Role};
use crate::state::Db;
use crate::store::KvStore;
use crate::token::TokenLedger;
use crate::types::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Parameters of a `register_candidate` call
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRegistration {
    pub pubkey: Vec<u8>,
    /// Basis points, 0 when absent
    pub fee: Option<u64>,
    pub max_referral_percentage: Option<u64>,
    pub name: String,
    pub description: String,
    pub website: String,
}

fn check_bps(value: u64, err: fn(u64) -> DposError) -> Result<u64> {
    if value > BASIS_POINTS {
        Err(err(value))
    } else {
        Ok(value)
    }
}

pub struct CandidateRegistry<'a, S> {
    db: &'a mut Db<S>,
}

impl<'a, S: KvStore> CandidateRegistry<'a, S> {
    pub fn new(db: &'a mut Db<S>) -> Self {
        Self { db }
    }

    fn require_candidate(&self, addr: &Address) -> Result<Candidate> {
        self.db
            .candidate(addr)?
            .ok_or_else(|| DposError::NotRegistered(addr.clone()))
    }

    pub fn is_whitelisted(&self, addr: &Address) -> Result<bool> {
        Ok(self
            .db
            .statistic(addr)?
            .map(|s| s.whitelist_amount > BigUint::ZERO)
            .unwrap_or(false))
    }

    pub fn register<T: TokenLedger>(
        &mut self,
        token: &mut T,
        contract: &Address,
        ctx: &CallContext,
        registration: CandidateRegistration,
    ) -> Result<()> {
        let sender = &ctx.sender;
        if self.db.candidate(sender)?.is_some() {
            return Err(DposError::AlreadyRegistered(sender.clone()));
        }
        let fee = check_bps(registration.fee.unwrap_or(0), DposError::InvalidFee)?;
        let max_referral_percentage = check_bps(
            registration.max_referral_percentage.unwrap_or(0),
            DposError::InvalidReferralPercentage,
        )?;

        let requirement = self.db.state()?.params.registration_requirement;
        let self_bond = !self.is_whitelisted(sender)? && requirement > BigUint::ZERO;
        if self_bond {
            token
                .transfer_from(contract, sender, contract, &requirement)
                .map_err(|_| DposError::InsufficientBalance)?;

            let mut ledger = DelegationLedger::new(self.db);
            let index = ledger.next_index(sender, sender)?;
            ledger.insert(&Delegation {
                update_amount: requirement.clone(),
                lock_time: ctx.now + LocktimeTier::TwoWeeks.duration(),
                state: DelegationState::Bonding,
                ..Delegation::empty(sender.clone(), sender.clone(), index)
            })?;
        }

        self.db.set_candidate(&Candidate {
            address: sender.clone(),
            pubkey: registration.pubkey,
            fee,
            new_fee: fee,
            state: CandidateState::Registered,
            max_referral_percentage,
            name: registration.name,
            description: registration.description,
            website: registration.website,
        })?;

        info!(
            "registered candidate {} (fee {} bps, self bond {})",
            sender,
            fee,
            if self_bond { requirement } else { BigUint::ZERO }
        );
        Ok(())
    }

    /// Mark the sender for removal and release every unlocked self-delegation.
    /// Refused while a fee change is staged.
    pub fn unregister(&mut self, ctx: &CallContext) -> Result<()> {
        let mut candidate = self.require_candidate(&ctx.sender)?;
        if matches!(
            candidate.state,
            CandidateState::AboutToChangeFee | CandidateState::ChangingFee
        ) {
            return Err(DposError::FeeChangeInProgress);
        }
        candidate.state = CandidateState::Unregistering;
        self.db.set_candidate(&candidate)?;

        let self_delegations = self.db.delegations_of(&ctx.sender, &ctx.sender)?;
        let mut ledger = DelegationLedger::new(self.db);
        for mut delegation in self_delegations {
            if delegation.is_reward_entry()
                || delegation.state != DelegationState::Bonded
                || delegation.amount == BigUint::ZERO
                || ctx.now < delegation.lock_time
            {
                continue;
            }
            delegation.state = DelegationState::Unbonding;
            delegation.update_amount = delegation.amount.clone();
            ledger.update(&delegation)?;
        }

        info!("candidate {} unregistering", ctx.sender);
        Ok(())
    }

    pub fn change_fee(&mut self, ctx: &CallContext, new_fee: u64) -> Result<()> {
        let new_fee = check_bps(new_fee, DposError::InvalidFee)?;
        let mut candidate = self.require_candidate(&ctx.sender)?;
        match candidate.state {
            CandidateState::Registered => {}
            CandidateState::Unregistering => {
                return Err(DposError::CandidateUnregistering(ctx.sender.clone()))
            }
            CandidateState::AboutToChangeFee | CandidateState::ChangingFee => {
                return Err(DposError::FeeChangeInProgress)
            }
        }
        candidate.new_fee = new_fee;
        candidate.state = CandidateState::AboutToChangeFee;
        self.db.set_candidate(&candidate)?;

        info!("candidate {} fee change {} -> {} staged", ctx.sender, candidate.fee, new_fee);
        Ok(())
    }

    pub fn update_info(
        &mut self,
        ctx: &CallContext,
        name: String,
        description: String,
        website: String,
        max_referral_percentage: u64,
    ) -> Result<()> {
        let max_referral_percentage =
            check_bps(max_referral_percentage, DposError::InvalidReferralPercentage)?;
        let mut candidate = self.require_candidate(&ctx.sender)?;
        candidate.name = name;
        candidate.description = description;
        candidate.website = website;
        candidate.max_referral_percentage = max_referral_percentage;
        self.db.set_candidate(&candidate)
    }

    /// Set whitelist amount and tier without an authorization check
    pub fn upsert_whitelist(&mut self, addr: &Address, amount: &BigUint, tier: LocktimeTier) -> Result<()> {
        let mut statistic = self
            .db
            .statistic(addr)?
            .unwrap_or_else(|| ValidatorStatistic::new(addr.clone()));
        statistic.whitelist_amount = amount.clone();
        statistic.whitelist_locktime_tier = tier;
        self.db.set_statistic(addr, &statistic)?;

        info!("whitelisted {} for {} (tier {:?})", addr, amount, tier);
        Ok(())
    }

    pub fn whitelist(&mut self, ctx: &CallContext, addr: &Address, amount: &BigUint, tier: LocktimeTier) -> Result<()> {
        require_role(self.db, &ctx.sender, Role::Oracle)?;
        self.upsert_whitelist(addr, amount, tier)
    }

    pub fn change_whitelist_info(
        &mut self,
        ctx: &CallContext,
        addr: &Address,
        amount: &BigUint,
        tier: LocktimeTier,
    ) -> Result<()> {
        require_role(self.db, &ctx.sender, Role::Oracle)?;
        if self.db.statistic(addr)?.is_none() {
            return Err(DposError::NotWhitelisted(addr.clone()));
        }
        self.upsert_whitelist(addr, amount, tier)
    }

    pub fn remove_whitelist(&mut self, ctx: &CallContext, addr: &Address) -> Result<()> {
        require_role(self.db, &ctx.sender, Role::Oracle)?;
        let mut statistic = self
            .db
            .statistic(addr)?
            .ok_or_else(|| DposError::NotWhitelisted(addr.clone()))?;
        statistic.whitelist_amount = BigUint::ZERO;
        statistic.whitelist_locktime_tier = LocktimeTier::TwoWeeks;
        self.db.set_statistic(addr, &statistic)?;

        info!("removed whitelist of {}", addr);
        Ok(())
    }

    pub fn register_referrer(&mut self, ctx: &CallContext, name: &str, addr: &Address) -> Result<()> {
        require_role(self.db, &ctx.sender, Role::Oracle)?;
        self.db.set_referrer(name, addr)?;
        info!("registered referrer {} -> {}", name, addr);
        Ok(())
    }

    /// Move every staged fee change one step forward. Returns how many
    /// candidates changed state.
    pub fn advance_fee_states(&mut self) -> Result<usize> {
        let mut advanced = 0;
        for mut candidate in self.db.candidates()? {
            match candidate.state {
                CandidateState::AboutToChangeFee => {
                    candidate.state = CandidateState::ChangingFee;
                }
                CandidateState::ChangingFee => {
                    candidate.fee = candidate.new_fee;
                    candidate.state = CandidateState::Registered;
                    debug!("candidate {} fee now {}", candidate.address, candidate.fee);
                }
                CandidateState::Registered | CandidateState::Unregistering => continue,
            }
            self.db.set_candidate(&candidate)?;
            advanced += 1;
        }
        Ok(advanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::grant_role;
    use crate::store::MemoryStore;
    use crate::token::MemoryToken;

    fn addr(b: u8) -> Address {
        Address::new("default", [b; 20])
    }

    fn contract() -> Address {
        Address::new("default", [0xdd; 20])
    }

    fn oracle() -> Address {
        addr(0xaa)
    }

    fn setup(requirement: BigUint) -> (Db<MemoryStore>, MemoryToken) {
        let mut db = Db::new(MemoryStore::new());
        let mut state = ContractState::default();
        state.params.registration_requirement = requirement;
        db.set_state(&state).unwrap();
        grant_role(&mut db, &oracle(), Role::Oracle).unwrap();
        (db, MemoryToken::new())
    }

    fn registration() -> CandidateRegistration {
        CandidateRegistration {
            pubkey: vec![1; 32],
            ..Default::default()
        }
    }

    #[test]
    fn test_register_with_requirement() {
        let (mut db, mut token) = setup(tokens(100));
        token.mint(&addr(1), &tokens(100));
        token.approve(&addr(1), &contract(), &tokens(100)).unwrap();
        let ctx = CallContext::new(addr(1), 10);

        CandidateRegistry::new(&mut db)
            .register(&mut token, &contract(), &ctx, registration())
            .unwrap();

        let candidate = db.candidate(&addr(1)).unwrap().unwrap();
        assert_eq!(candidate.fee, 0);
        assert_eq!(candidate.state, CandidateState::Registered);

        let bond = db.delegation(&addr(1), &addr(1), 1).unwrap().unwrap();
        assert_eq!(bond.update_amount, tokens(100));
        assert_eq!(token.balance_of(&contract()), tokens(100));

        let err = CandidateRegistry::new(&mut db)
            .register(&mut token, &contract(), &ctx, registration())
            .unwrap_err();
        assert!(matches!(err, DposError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_register_insufficient_balance() {
        let (mut db, mut token) = setup(tokens(100));
        token.mint(&addr(1), &tokens(99));
        token.approve(&addr(1), &contract(), &tokens(100)).unwrap();
        let ctx = CallContext::new(addr(1), 10);

        let err = CandidateRegistry::new(&mut db)
            .register(&mut token, &contract(), &ctx, registration())
            .unwrap_err();
        assert!(matches!(err, DposError::InsufficientBalance));
    }

    #[test]
    fn test_whitelisted_register_is_free() {
        let (mut db, mut token) = setup(tokens(100));
        let oracle_ctx = CallContext::new(oracle(), 0);
        CandidateRegistry::new(&mut db)
            .whitelist(&oracle_ctx, &addr(1), &tokens(500), LocktimeTier::SixMonths)
            .unwrap();

        let ctx = CallContext::new(addr(1), 10);
        CandidateRegistry::new(&mut db)
            .register(&mut token, &contract(), &ctx, registration())
            .unwrap();
        assert!(db.delegations_of(&addr(1), &addr(1)).unwrap().is_empty());
        assert_eq!(db.delegation_count().unwrap(), 0);
    }

    #[test]
    fn test_whitelist_requires_oracle() {
        let (mut db, _) = setup(BigUint::ZERO);
        let ctx = CallContext::new(addr(5), 0);
        let mut registry = CandidateRegistry::new(&mut db);

        assert!(matches!(
            registry.whitelist(&ctx, &addr(1), &tokens(1), LocktimeTier::TwoWeeks),
            Err(DposError::NotAuthorized(_))
        ));
        assert!(matches!(
            registry.remove_whitelist(&ctx, &addr(1)),
            Err(DposError::NotAuthorized(_))
        ));
        assert!(matches!(
            registry.register_referrer(&ctx, "ref", &addr(3)),
            Err(DposError::NotAuthorized(_))
        ));

        let oracle_ctx = CallContext::new(oracle(), 0);
        assert!(matches!(
            registry.change_whitelist_info(&oracle_ctx, &addr(1), &tokens(1), LocktimeTier::OneYear),
            Err(DposError::NotWhitelisted(_))
        ));
        registry
            .whitelist(&oracle_ctx, &addr(1), &tokens(1), LocktimeTier::TwoWeeks)
            .unwrap();
        registry
            .change_whitelist_info(&oracle_ctx, &addr(1), &tokens(2), LocktimeTier::OneYear)
            .unwrap();
        let stat = db.statistic(&addr(1)).unwrap().unwrap();
        assert_eq!(stat.whitelist_amount, tokens(2));
        assert_eq!(stat.whitelist_locktime_tier, LocktimeTier::OneYear);

        CandidateRegistry::new(&mut db)
            .remove_whitelist(&oracle_ctx, &addr(1))
            .unwrap();
        assert_eq!(db.statistic(&addr(1)).unwrap().unwrap().whitelist_amount, BigUint::ZERO);
    }

    #[test]
    fn test_fee_change_takes_two_steps() {
        let (mut db, mut token) = setup(BigUint::ZERO);
        let ctx = CallContext::new(addr(1), 0);
        let mut registry = CandidateRegistry::new(&mut db);
        registry
            .register(&mut token, &contract(), &ctx, CandidateRegistration {
                fee: Some(500),
                ..registration()
            })
            .unwrap();

        assert!(matches!(
            registry.change_fee(&ctx, 10_001),
            Err(DposError::InvalidFee(10_001))
        ));
        registry.change_fee(&ctx, 1_000).unwrap();
        assert!(matches!(
            registry.change_fee(&ctx, 2_000),
            Err(DposError::FeeChangeInProgress)
        ));

        registry.advance_fee_states().unwrap();
        let c = db.candidate(&addr(1)).unwrap().unwrap();
        assert_eq!((c.fee, c.new_fee, c.state), (500, 1_000, CandidateState::ChangingFee));

        CandidateRegistry::new(&mut db).advance_fee_states().unwrap();
        let c = db.candidate(&addr(1)).unwrap().unwrap();
        assert_eq!((c.fee, c.state), (1_000, CandidateState::Registered));
    }

    #[test]
    fn test_unregister_releases_unlocked_self_bond() {
        let (mut db, mut token) = setup(BigUint::ZERO);
        let ctx = CallContext::new(addr(1), 0);
        CandidateRegistry::new(&mut db)
            .register(&mut token, &contract(), &ctx, registration())
            .unwrap();

        let mut ledger = DelegationLedger::new(&mut db);
        for (index, lock_time) in [(1u64, 50u64), (2, 500)] {
            ledger
                .insert(&Delegation {
                    amount: tokens(10),
                    lock_time,
                    ..Delegation::empty(addr(1), addr(1), index)
                })
                .unwrap();
        }

        CandidateRegistry::new(&mut db)
            .unregister(&CallContext::new(addr(1), 100))
            .unwrap();
        assert!(db.candidate(&addr(1)).unwrap().unwrap().is_unregistering());
        let unlocked = db.delegation(&addr(1), &addr(1), 1).unwrap().unwrap();
        let locked = db.delegation(&addr(1), &addr(1), 2).unwrap().unwrap();
        assert_eq!(unlocked.state, DelegationState::Unbonding);
        assert_eq!(unlocked.update_amount, tokens(10));
        assert_eq!(locked.state, DelegationState::Bonded);

        let err = CandidateRegistry::new(&mut db)
            .unregister(&CallContext::new(addr(2), 100))
            .unwrap_err();
        assert!(matches!(err, DposError::NotRegistered(_)));
    }

    #[test]
    fn test_unregister_during_fee_change() {
        let (mut db, mut token) = setup(BigUint::ZERO);
        let ctx = CallContext::new(addr(1), 0);
        let mut registry = CandidateRegistry::new(&mut db);
        registry.register(&mut token, &contract(), &ctx, registration()).unwrap();
        registry.change_fee(&ctx, 1_000).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                registry.unregister(&ctx),
                Err(DposError::FeeChangeInProgress)
            ));
            registry.advance_fee_states().unwrap();
        }

        registry.unregister(&ctx).unwrap();
        let c = db.candidate(&addr(1)).unwrap().unwrap();
        assert_eq!((c.fee, c.state), (1_000, CandidateState::Unregistering));
    }
}
