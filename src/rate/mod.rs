//! Admission control: fixed-window limits per route class plus the daily
//! chat quota.

pub mod policy;
pub mod quota;
pub mod window;

pub use policy::{RateClass, RatePolicy};
pub use quota::{DailyQuota, MemoryUsageStore, QuotaDecision, UsageCount, UsageStore, day_key};
pub use window::{FixedWindowLimiter, RateDecision};
