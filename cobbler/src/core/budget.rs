//! Execution quotas for the cycle scheduler.
//!
//! A limit of `0` means "unlimited" throughout.

/// Quota for the next stitch pass, or `None` if the lifetime budget is spent.
///
/// Returns `Some(0)` when both limits are unlimited.
pub fn cycle_quota(per_cycle: u32, total: u32, attempted: u32) -> Option<u32> {
    if total == 0 {
        return Some(per_cycle);
    }
    let remaining = total.saturating_sub(attempted);
    if remaining == 0 {
        return None;
    }
    if per_cycle == 0 {
        return Some(remaining);
    }
    Some(per_cycle.min(remaining))
}

/// True if `used` has reached a non-zero `limit`.
pub fn limit_reached(limit: u32, used: u32) -> bool {
    limit > 0 && used >= limit
}
