//! Typed access to contract records
//!
//! Every record lives under a composite key in the host store and is
//! encoded with bincode. Key layout:
//!
//! ```text
//! candidate/<addr>                        -> Candidate
//! statistic/<addr>                        -> ValidatorStatistic
//! delegation/<validator><delegator><idx>  -> Delegation   (idx: u64 BE)
//! referrer/<name>                         -> Address
//! request/<block><tx><log>                -> ()            (u64 BE each)
//! role/<addr>                             -> Vec<Role>
//! state                                   -> ContractState
//! delegation-count                        -> u64
//! ```

use crate::error::Result;
use crate::roles::Role;
use crate::store::{KvRead, KvStore};
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const CANDIDATE_PREFIX: &[u8] = b"candidate/";
const STATISTIC_PREFIX: &[u8] = b"statistic/";
const DELEGATION_PREFIX: &[u8] = b"delegation/";
const REFERRER_PREFIX: &[u8] = b"referrer/";
const REQUEST_PREFIX: &[u8] = b"request/";
const ROLE_PREFIX: &[u8] = b"role/";
const STATE_KEY: &[u8] = b"state";
const DELEGATION_COUNT_KEY: &[u8] = b"delegation-count";

/// Origin coordinates of an oracle request on the source chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestMeta {
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
}

fn key(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

fn address_key(prefix: &[u8], addr: &Address) -> Result<Vec<u8>> {
    Ok(key(prefix, &[&addr.key_bytes()?]))
}

fn delegation_pair_key(validator: &Address, delegator: &Address) -> Result<Vec<u8>> {
    Ok(key(
        DELEGATION_PREFIX,
        &[&validator.key_bytes()?, &delegator.key_bytes()?],
    ))
}

fn delegation_key(validator: &Address, delegator: &Address, index: DelegationIndex) -> Result<Vec<u8>> {
    let mut out = delegation_pair_key(validator, delegator)?;
    out.extend_from_slice(&index.to_be_bytes());
    Ok(out)
}

fn request_key(meta: &RequestMeta) -> Vec<u8> {
    key(
        REQUEST_PREFIX,
        &[
            &meta.block_number.to_be_bytes(),
            &meta.tx_index.to_be_bytes(),
            &meta.log_index.to_be_bytes(),
        ],
    )
}

/// Typed view over a contract store
pub struct Db<S> {
    store: S,
}

impl<S> Db<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: KvRead> Db<S> {
    fn load<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.store
            .range(prefix)?
            .into_iter()
            .map(|(_, bytes)| -> Result<T> { Ok(bincode::deserialize(&bytes)?) })
            .collect()
    }

    pub fn state(&self) -> Result<ContractState> {
        Ok(self.load(STATE_KEY)?.unwrap_or_default())
    }

    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.store.has(STATE_KEY)?)
    }

    pub fn candidate(&self, addr: &Address) -> Result<Option<Candidate>> {
        self.load(&address_key(CANDIDATE_PREFIX, addr)?)
    }

    /// All candidates in key order
    pub fn candidates(&self) -> Result<Vec<Candidate>> {
        self.scan(CANDIDATE_PREFIX)
    }

    pub fn statistic(&self, addr: &Address) -> Result<Option<ValidatorStatistic>> {
        self.load(&address_key(STATISTIC_PREFIX, addr)?)
    }

    pub fn statistics(&self) -> Result<Vec<ValidatorStatistic>> {
        self.scan(STATISTIC_PREFIX)
    }

    pub fn delegation(
        &self,
        validator: &Address,
        delegator: &Address,
        index: DelegationIndex,
    ) -> Result<Option<Delegation>> {
        self.load(&delegation_key(validator, delegator, index)?)
    }

    /// Delegations of one (validator, delegator) pair, ordered by index
    pub fn delegations_of(&self, validator: &Address, delegator: &Address) -> Result<Vec<Delegation>> {
        self.scan(&delegation_pair_key(validator, delegator)?)
    }

    pub fn delegations_to(&self, validator: &Address) -> Result<Vec<Delegation>> {
        self.scan(&address_key(DELEGATION_PREFIX, validator)?)
    }

    pub fn delegations(&self) -> Result<Vec<Delegation>> {
        self.scan(DELEGATION_PREFIX)
    }

    pub fn delegation_count(&self) -> Result<u64> {
        Ok(self.load(DELEGATION_COUNT_KEY)?.unwrap_or(0))
    }

    pub fn referrer(&self, name: &str) -> Result<Option<Address>> {
        self.load(&key(REFERRER_PREFIX, &[name.as_bytes()]))
    }

    pub fn request_applied(&self, meta: &RequestMeta) -> Result<bool> {
        Ok(self.store.has(&request_key(meta))?)
    }

    pub fn roles(&self, addr: &Address) -> Result<Vec<Role>> {
        Ok(self
            .load(&address_key(ROLE_PREFIX, addr)?)?
            .unwrap_or_default())
    }
}

impl<S: KvStore> Db<S> {
    fn save<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<()> {
        self.store.set(key, bincode::serialize(value)?)?;
        Ok(())
    }

    pub fn set_state(&mut self, state: &ContractState) -> Result<()> {
        self.save(STATE_KEY, state)
    }

    pub fn set_candidate(&mut self, candidate: &Candidate) -> Result<()> {
        self.save(&address_key(CANDIDATE_PREFIX, &candidate.address)?, candidate)
    }

    pub fn delete_candidate(&mut self, addr: &Address) -> Result<()> {
        self.store.delete(&address_key(CANDIDATE_PREFIX, addr)?)?;
        Ok(())
    }

    pub fn set_statistic(&mut self, addr: &Address, statistic: &ValidatorStatistic) -> Result<()> {
        self.save(&address_key(STATISTIC_PREFIX, addr)?, statistic)
    }

    pub fn delete_statistic(&mut self, addr: &Address) -> Result<()> {
        self.store.delete(&address_key(STATISTIC_PREFIX, addr)?)?;
        Ok(())
    }

    pub fn set_delegation(&mut self, delegation: &Delegation) -> Result<()> {
        self.save(
            &delegation_key(&delegation.validator, &delegation.delegator, delegation.index)?,
            delegation,
        )
    }

    pub fn delete_delegation(
        &mut self,
        validator: &Address,
        delegator: &Address,
        index: DelegationIndex,
    ) -> Result<()> {
        self.store
            .delete(&delegation_key(validator, delegator, index)?)?;
        Ok(())
    }

    pub fn set_delegation_count(&mut self, count: u64) -> Result<()> {
        self.save(DELEGATION_COUNT_KEY, &count)
    }

    pub fn set_referrer(&mut self, name: &str, addr: &Address) -> Result<()> {
        self.save(&key(REFERRER_PREFIX, &[name.as_bytes()]), addr)
    }

    pub fn mark_request_applied(&mut self, meta: &RequestMeta) -> Result<()> {
        self.save(&request_key(meta), &())
    }

    pub fn set_roles(&mut self, addr: &Address, roles: &[Role]) -> Result<()> {
        let role_key = address_key(ROLE_PREFIX, addr)?;
        if roles.is_empty() {
            self.store.delete(&role_key)?;
            Ok(())
        } else {
            self.save(&role_key, &roles.to_vec())
        }
    }
}
