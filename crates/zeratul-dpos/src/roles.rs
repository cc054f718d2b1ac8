//! Capability table
//!
//! Privileged calls check the caller's roles, stored per address.

use crate::error::{DposError, Result};
use crate::state::Db;
use crate::store::{KvRead, KvStore};
use crate::types::Address;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Whitelists candidates, registers referrers, submits request batches
    /// and tunes parameters
    Oracle,
}

pub fn has_role<S: KvRead>(db: &Db<S>, addr: &Address, role: Role) -> Result<bool> {
    Ok(db.roles(addr)?.contains(&role))
}

pub fn require_role<S: KvRead>(db: &Db<S>, addr: &Address, role: Role) -> Result<()> {
    if has_role(db, addr, role)? {
        Ok(())
    } else {
        Err(DposError::NotAuthorized(addr.clone()))
    }
}

pub fn grant_role<S: KvStore>(db: &mut Db<S>, addr: &Address, role: Role) -> Result<()> {
    let mut roles = db.roles(addr)?;
    if !roles.contains(&role) {
        roles.push(role);
        roles.sort();
        db.set_roles(addr, &roles)?;
    }
    Ok(())
}

pub fn revoke_role<S: KvStore>(db: &mut Db<S>, addr: &Address, role: Role) -> Result<()> {
    let mut roles = db.roles(addr)?;
    roles.retain(|r| *r != role);
    db.set_roles(addr, &roles)
}
