pub mod events;
pub mod rate_limit;
pub mod security;

pub use events::{EventBus, Subscription};
pub use rate_limit::{Decision, RateLimiter, RatePreset};
pub use security::constant_time_eq;
