//! Validator power normalization
//!
//! Bounds any single validator's share of voting power.
//!
//! ## Algorithm
//!
//! 1. With fewer than [`MIN_CAPPED_VALIDATORS`] validators no cap can be
//!    satisfied, so powers are returned as-is.
//! 2. `cap = sum * 28 / 100`, fixed for the whole call.
//! 3. Clamp every power above `cap` and pool the excess.
//! 4. Split the pool evenly (integer division) over the powers that were not
//!    clamped, clamping each at `cap` again. Whatever is clamped off is lost.
//! 5. Repeat from 3 until nothing exceeds `cap`.
//!
//! The result depends only on the multiset of inputs, keeps input order,
//! and never sums to more than the input.

use num_bigint::BigUint;

/// Cap as a percentage of total power
pub const POWER_CAP_PERCENT: u32 = 28;

/// Smallest set where the cap is applied
pub const MIN_CAPPED_VALIDATORS: usize = 4;

pub fn apply_power_cap(powers: &[BigUint]) -> Vec<BigUint> {
    let mut out = powers.to_vec();
    if out.len() < MIN_CAPPED_VALIDATORS {
        return out;
    }

    let sum: BigUint = out.iter().sum();
    let cap = sum * BigUint::from(POWER_CAP_PERCENT) / BigUint::from(100u32);

    while out.iter().any(|p| *p > cap) {
        let mut excess = BigUint::ZERO;
        let mut clamped = vec![false; out.len()];
        for (power, was_clamped) in out.iter_mut().zip(clamped.iter_mut()) {
            if *power > cap {
                excess += &*power - &cap;
                *power = cap.clone();
                *was_clamped = true;
            }
        }

        let receivers = clamped.iter().filter(|c| !**c).count();
        if receivers == 0 {
            break;
        }
        let share = excess / BigUint::from(receivers);
        for (power, was_clamped) in out.iter_mut().zip(clamped.iter()) {
            if !*was_clamped {
                *power += &share;
                if *power > cap {
                    *power = cap.clone();
                }
            }
        }
    }

    out
}
