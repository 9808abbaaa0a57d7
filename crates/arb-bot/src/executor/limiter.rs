//! Request throttling shared by every executor variant.
//!
//! Two limits guard the venue:
//!
//! - a general request budget, refilled continuously at
//!   `max_requests_per_minute / 60` per second
//! - an orders-per-second ceiling for the short burst window
//!
//! Order submissions consume one slot from each; snapshot reads consume
//! only a request slot. Admission blocks until both slots are available.

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Process-wide admission gate for venue traffic.
pub struct ThrottleGate {
    requests: GovernorLimiter,
    orders: GovernorLimiter,
}

impl ThrottleGate {
    /// Create a gate. Zero limits are clamped to one to keep the quotas
    /// well-formed.
    pub fn new(max_requests_per_minute: u32, max_orders_per_second: u32) -> Self {
        let per_minute =
            NonZeroU32::new(max_requests_per_minute.max(1)).expect("clamped to >= 1");
        let per_second = NonZeroU32::new(max_orders_per_second.max(1)).expect("clamped to >= 1");
        Self {
            requests: RateLimiter::direct(Quota::per_minute(per_minute)),
            orders: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    /// Block until a general request slot is available.
    pub async fn wait_for_request(&self) {
        self.requests.until_ready().await;
    }

    /// Block until both an order slot and a request slot are available.
    pub async fn wait_for_order(&self) {
        self.orders.until_ready().await;
        self.requests.until_ready().await;
    }

    /// Non-blocking probe for a request slot (used by tests).
    pub fn try_request(&self) -> bool {
        self.requests.check().is_ok()
    }

    /// Non-blocking probe consuming both an order and a request slot.
    pub fn try_order(&self) -> bool {
        if self.orders.check().is_err() {
            return false;
        }
        self.requests.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_up_to_quota_then_denied() {
        let gate = ThrottleGate::new(1200, 2);
        assert!(gate.try_order());
        assert!(gate.try_order());
        // Third order within the same second is denied.
        assert!(!gate.try_order());
        // Plain requests still flow from the larger per-minute budget.
        assert!(gate.try_request());
    }

    #[test]
    fn test_request_budget_exhausts() {
        let gate = ThrottleGate::new(3, 100);
        assert!(gate.try_request());
        assert!(gate.try_request());
        assert!(gate.try_request());
        assert!(!gate.try_request());
    }

    #[test]
    fn test_order_consumes_request_slot() {
        let gate = ThrottleGate::new(2, 100);
        assert!(gate.try_order());
        assert!(gate.try_order());
        // Request budget gone, even though order slots remain.
        assert!(!gate.try_request());
    }

    #[test]
    fn test_zero_limits_clamped() {
        let gate = ThrottleGate::new(0, 0);
        assert!(gate.try_order());
    }

    #[tokio::test]
    async fn test_wait_admits_within_quota() {
        let gate = ThrottleGate::new(1200, 50);
        for _ in 0..5 {
            gate.wait_for_order().await;
        }
        gate.wait_for_request().await;
    }
}
