//! Contract entry points
//!
//! [`Dpos`] owns the backing store and the token ledger. Every transaction
//! and every election runs against a fresh [`Overlay`]; its writes are
//! committed only when the call returns `Ok`, so a failed call leaves no
//! trace in the store. Token side effects are issued after a call's
//! validation has passed.

use crate::batch::{BatchReport, BatchRequest, RequestBatchProcessor};
use crate::election::{ElectionEngine, ElectionOutcome};
use crate::error::{DposError, Result};
use crate::ledger::DelegationLedger;
use crate::queries::Queries;
use crate::registry::{CandidateRegistration, CandidateRegistry};
use crate::roles::{grant_role, require_role, revoke_role, Role};
use crate::state::Db;
use crate::store::{Changeset, KvStore, Overlay};
use crate::token::TokenLedger;
use crate::types::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Mutating calls. Elections go through [`Dpos::elect`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transaction {
    RegisterCandidate(CandidateRegistration),
    UnregisterCandidate,
    ChangeFee {
        fee: u64,
    },
    UpdateCandidateInfo {
        name: String,
        description: String,
        website: String,
        max_referral_percentage: u64,
    },
    WhitelistCandidate {
        candidate: Address,
        amount: BigUint,
        locktime_tier: LocktimeTier,
    },
    RemoveWhitelistedCandidate {
        candidate: Address,
    },
    ChangeWhitelistInfo {
        candidate: Address,
        amount: BigUint,
        locktime_tier: LocktimeTier,
    },
    Delegate {
        validator: Address,
        amount: BigUint,
        locktime_tier: Option<LocktimeTier>,
        referrer: Option<String>,
    },
    Redelegate {
        from: Address,
        to: Address,
        amount: BigUint,
        index: DelegationIndex,
        new_locktime_tier: Option<LocktimeTier>,
    },
    Unbond {
        validator: Address,
        amount: BigUint,
        index: DelegationIndex,
    },
    RegisterReferrer {
        name: String,
        address: Address,
    },
    ProcessRequestBatch(Vec<BatchRequest>),
    SetElectionCycle {
        seconds: u64,
    },
    SetMaxYearlyReward {
        amount: BigUint,
    },
    SetRegistrationRequirement {
        amount: BigUint,
    },
    SetValidatorCount {
        count: u64,
    },
    SetOracleAddress {
        address: Address,
    },
}

impl Transaction {
    pub fn name(&self) -> &'static str {
        match self {
            Transaction::RegisterCandidate(_) => "register_candidate",
            Transaction::UnregisterCandidate => "unregister_candidate",
            Transaction::ChangeFee { .. } => "change_fee",
            Transaction::UpdateCandidateInfo { .. } => "update_candidate_info",
            Transaction::WhitelistCandidate { .. } => "whitelist_candidate",
            Transaction::RemoveWhitelistedCandidate { .. } => "remove_whitelisted_candidate",
            Transaction::ChangeWhitelistInfo { .. } => "change_whitelist_info",
            Transaction::Delegate { .. } => "delegate",
            Transaction::Redelegate { .. } => "redelegate",
            Transaction::Unbond { .. } => "unbond",
            Transaction::RegisterReferrer { .. } => "register_referrer",
            Transaction::ProcessRequestBatch(_) => "process_request_batch",
            Transaction::SetElectionCycle { .. } => "set_election_cycle",
            Transaction::SetMaxYearlyReward { .. } => "set_max_yearly_reward",
            Transaction::SetRegistrationRequirement { .. } => "set_registration_requirement",
            Transaction::SetValidatorCount { .. } => "set_validator_count",
            Transaction::SetOracleAddress { .. } => "set_oracle_address",
        }
    }
}

/// Result of a successful transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Receipt {
    Done,
    Delegated { index: DelegationIndex },
    Batch(BatchReport),
}

/// The staking contract
pub struct Dpos<S, T> {
    store: S,
    token: T,
    address: Address,
}

impl<S: KvStore, T: TokenLedger> Dpos<S, T> {
    /// Write genesis state. `params.oracle_address`, if set, gets the
    /// oracle role.
    pub fn init(store: S, token: T, address: Address, params: Params) -> Result<Self> {
        let mut dpos = Self { store, token, address };
        let mut overlay = Overlay::new(&dpos.store);
        {
            let mut db = Db::new(&mut overlay);
            if let Some(oracle) = &params.oracle_address {
                grant_role(&mut db, oracle, Role::Oracle)?;
            }
            db.set_state(&ContractState {
                params,
                ..ContractState::default()
            })?;
            db.set_delegation_count(0)?;
        }
        let changes = overlay.into_changeset();
        dpos.commit(changes)?;
        info!("initialized dpos contract {}", dpos.address);
        Ok(dpos)
    }

    /// Open a contract whose state already lives in `store`
    pub fn open(store: S, token: T, address: Address) -> Self {
        Self { store, token, address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    pub fn into_parts(self) -> (S, T) {
        (self.store, self.token)
    }

    fn commit(&mut self, changes: Changeset) -> Result<()> {
        debug!("committing {} writes", changes.len());
        changes.commit(&mut self.store)?;
        Ok(())
    }

    pub fn execute(&mut self, ctx: &CallContext, tx: Transaction) -> Result<Receipt> {
        let name = tx.name();
        let mut overlay = Overlay::new(&self.store);
        let result = apply(&mut Db::new(&mut overlay), &mut self.token, &self.address, ctx, tx);
        match result {
            Ok(receipt) => {
                let changes = overlay.into_changeset();
                self.commit(changes)?;
                Ok(receipt)
            }
            Err(err) => {
                debug!("{} from {} failed: {}", name, ctx.sender, err);
                Err(err)
            }
        }
    }

    /// Run an election. Privileged: the hosting chain calls this once per
    /// block and the cycle length decides whether anything happens.
    pub fn elect(&mut self, now: Timestamp) -> Result<ElectionOutcome> {
        let mut overlay = Overlay::new(&self.store);
        let outcome = {
            let mut db = Db::new(&mut overlay);
            ElectionEngine::new(&mut db, &mut self.token, &self.address).run(now)?
        };
        let changes = overlay.into_changeset();
        self.commit(changes)?;
        Ok(outcome)
    }

    /// Read-only view of the committed state
    pub fn query(&self) -> Queries<&S> {
        Queries::new(Db::new(&self.store))
    }
}

fn apply<S: KvStore, T: TokenLedger>(
    db: &mut Db<S>,
    token: &mut T,
    contract: &Address,
    ctx: &CallContext,
    tx: Transaction,
) -> Result<Receipt> {
    match tx {
        Transaction::RegisterCandidate(registration) => {
            CandidateRegistry::new(db).register(token, contract, ctx, registration)?;
        }
        Transaction::UnregisterCandidate => CandidateRegistry::new(db).unregister(ctx)?,
        Transaction::ChangeFee { fee } => CandidateRegistry::new(db).change_fee(ctx, fee)?,
        Transaction::UpdateCandidateInfo {
            name,
            description,
            website,
            max_referral_percentage,
        } => CandidateRegistry::new(db).update_info(ctx, name, description, website, max_referral_percentage)?,
        Transaction::WhitelistCandidate {
            candidate,
            amount,
            locktime_tier,
        } => CandidateRegistry::new(db).whitelist(ctx, &candidate, &amount, locktime_tier)?,
        Transaction::RemoveWhitelistedCandidate { candidate } => {
            CandidateRegistry::new(db).remove_whitelist(ctx, &candidate)?
        }
        Transaction::ChangeWhitelistInfo {
            candidate,
            amount,
            locktime_tier,
        } => CandidateRegistry::new(db).change_whitelist_info(ctx, &candidate, &amount, locktime_tier)?,
        Transaction::Delegate {
            validator,
            amount,
            locktime_tier,
            referrer,
        } => {
            let index = DelegationLedger::new(db).delegate(
                token,
                contract,
                ctx,
                &validator,
                &amount,
                locktime_tier.unwrap_or_default(),
                referrer,
            )?;
            return Ok(Receipt::Delegated { index });
        }
        Transaction::Redelegate {
            from,
            to,
            amount,
            index,
            new_locktime_tier,
        } => DelegationLedger::new(db).redelegate(ctx, &from, &to, &amount, index, new_locktime_tier)?,
        Transaction::Unbond {
            validator,
            amount,
            index,
        } => DelegationLedger::new(db).unbond(ctx, &validator, &amount, index)?,
        Transaction::RegisterReferrer { name, address } => {
            CandidateRegistry::new(db).register_referrer(ctx, &name, &address)?
        }
        Transaction::ProcessRequestBatch(batch) => {
            let report = RequestBatchProcessor::new(db).process(ctx, &batch)?;
            return Ok(Receipt::Batch(report));
        }
        Transaction::SetElectionCycle { seconds } => {
            update_params(db, ctx, |p| {
                p.election_cycle_length = seconds;
                Ok(())
            })?
        }
        Transaction::SetMaxYearlyReward { amount } => update_params(db, ctx, |p| {
            p.max_yearly_reward = amount;
            Ok(())
        })?,
        Transaction::SetRegistrationRequirement { amount } => update_params(db, ctx, |p| {
            p.registration_requirement = amount;
            Ok(())
        })?,
        Transaction::SetValidatorCount { count } => update_params(db, ctx, |p| {
            if count == 0 {
                return Err(DposError::InvalidValidatorCount);
            }
            p.validator_count = count;
            Ok(())
        })?,
        Transaction::SetOracleAddress { address } => {
            require_role(db, &ctx.sender, Role::Oracle)?;
            let mut state = db.state()?;
            if let Some(previous) = state.params.oracle_address.take() {
                revoke_role(db, &previous, Role::Oracle)?;
            }
            grant_role(db, &address, Role::Oracle)?;
            info!("oracle changed to {}", address);
            state.params.oracle_address = Some(address);
            db.set_state(&state)?;
        }
    }
    Ok(Receipt::Done)
}

/// Oracle-only parameter change
fn update_params<S: KvStore>(
    db: &mut Db<S>,
    ctx: &CallContext,
    f: impl FnOnce(&mut Params) -> Result<()>,
) -> Result<()> {
    require_role(db, &ctx.sender, Role::Oracle)?;
    let mut state = db.state()?;
    f(&mut state.params)?;
    db.set_state(&state)?;
    info!("params updated by {}", ctx.sender);
    Ok(())
}
