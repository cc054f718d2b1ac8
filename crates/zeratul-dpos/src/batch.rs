//! Oracle request batches
//!
//! The oracle relays events observed on a source chain. Each request carries
//! the coordinates of the log that produced it, and a coordinate is applied
//! at most once, so the oracle can safely resubmit overlapping batches.

use crate::error::{DposError, Result};
use crate::registry::CandidateRegistry;
use crate::roles::{require_role, Role};
use crate::state::{Db, RequestMeta};
use crate::store::KvStore;
use crate::types::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Request kinds an oracle can submit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPayload {
    WhitelistCandidate {
        candidate: Address,
        amount: BigUint,
        locktime_tier: LocktimeTier,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub meta: RequestMeta,
    pub payload: BatchPayload,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub skipped: usize,
}

pub struct RequestBatchProcessor<'a, S> {
    db: &'a mut Db<S>,
}

impl<'a, S: KvStore> RequestBatchProcessor<'a, S> {
    pub fn new(db: &'a mut Db<S>) -> Self {
        Self { db }
    }

    pub fn process(&mut self, ctx: &CallContext, batch: &[BatchRequest]) -> Result<BatchReport> {
        require_role(self.db, &ctx.sender, Role::Oracle)?;
        if batch.is_empty() {
            return Err(DposError::EmptyBatch);
        }

        let mut report = BatchReport::default();
        for request in batch {
            if self.db.request_applied(&request.meta)? {
                debug!("skipping replayed request {:?}", request.meta);
                report.skipped += 1;
                continue;
            }
            self.apply(&request.payload)?;
            self.db.mark_request_applied(&request.meta)?;
            report.applied += 1;
        }

        info!(
            "processed request batch: {} applied, {} skipped",
            report.applied, report.skipped
        );
        Ok(report)
    }

    fn apply(&mut self, payload: &BatchPayload) -> Result<()> {
        match payload {
            BatchPayload::WhitelistCandidate {
                candidate,
                amount,
                locktime_tier,
            } => CandidateRegistry::new(self.db).upsert_whitelist(candidate, amount, *locktime_tier),
        }
    }
}
