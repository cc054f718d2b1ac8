//! Fungible token interface
//!
//! Delegations are paid in and out through the chain's coin contract. Calls
//! are synchronous in-process invocations.

use crate::types::Address;
use num_bigint::BigUint;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: String, available: String },
    #[error("insufficient allowance: need {needed}, allowed {allowed}")]
    InsufficientAllowance { needed: String, allowed: String },
}

/// Coin contract operations the engine depends on
pub trait TokenLedger {
    fn transfer(&mut self, from: &Address, to: &Address, amount: &BigUint) -> Result<(), TokenError>;

    /// Move `amount` from `from` to `to` on behalf of `spender`
    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &BigUint,
    ) -> Result<(), TokenError>;

    fn approve(&mut self, owner: &Address, spender: &Address, amount: &BigUint) -> Result<(), TokenError>;

    fn allowance(&self, owner: &Address, spender: &Address) -> BigUint;

    fn balance_of(&self, owner: &Address) -> BigUint;
}

impl<T: TokenLedger + ?Sized> TokenLedger for &mut T {
    fn transfer(&mut self, from: &Address, to: &Address, amount: &BigUint) -> Result<(), TokenError> {
        (**self).transfer(from, to, amount)
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &BigUint,
    ) -> Result<(), TokenError> {
        (**self).transfer_from(spender, from, to, amount)
    }

    fn approve(&mut self, owner: &Address, spender: &Address, amount: &BigUint) -> Result<(), TokenError> {
        (**self).approve(owner, spender, amount)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> BigUint {
        (**self).allowance(owner, spender)
    }

    fn balance_of(&self, owner: &Address) -> BigUint {
        (**self).balance_of(owner)
    }
}

/// In-memory coin ledger
#[derive(Debug, Clone, Default)]
pub struct MemoryToken {
    balances: BTreeMap<Address, BigUint>,
    allowances: BTreeMap<(Address, Address), BigUint>,
    total_supply: BigUint,
}

impl MemoryToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, to: &Address, amount: &BigUint) {
        *self.balances.entry(to.clone()).or_default() += amount;
        self.total_supply += amount;
    }

    pub fn total_supply(&self) -> &BigUint {
        &self.total_supply
    }

    fn debit(&mut self, from: &Address, amount: &BigUint) -> Result<(), TokenError> {
        let available = self.balance_of(from);
        if &available < amount {
            return Err(TokenError::InsufficientBalance {
                needed: amount.to_string(),
                available: available.to_string(),
            });
        }
        self.balances.insert(from.clone(), available - amount);
        Ok(())
    }
}

impl TokenLedger for MemoryToken {
    fn transfer(&mut self, from: &Address, to: &Address, amount: &BigUint) -> Result<(), TokenError> {
        self.debit(from, amount)?;
        *self.balances.entry(to.clone()).or_default() += amount;
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &BigUint,
    ) -> Result<(), TokenError> {
        let allowed = self.allowance(from, spender);
        if &allowed < amount {
            return Err(TokenError::InsufficientAllowance {
                needed: amount.to_string(),
                allowed: allowed.to_string(),
            });
        }
        self.transfer(from, to, amount)?;
        self.allowances
            .insert((from.clone(), spender.clone()), allowed - amount);
        Ok(())
    }

    fn approve(&mut self, owner: &Address, spender: &Address, amount: &BigUint) -> Result<(), TokenError> {
        self.allowances
            .insert((owner.clone(), spender.clone()), amount.clone());
        Ok(())
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> BigUint {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn balance_of(&self, owner: &Address) -> BigUint {
        self.balances.get(owner).cloned().unwrap_or_default()
    }
}
