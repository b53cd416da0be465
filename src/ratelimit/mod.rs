//! Rate limiting rules, evaluation and window addressing.

mod clock;
mod key;
mod limiter;
mod rule;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use key::WindowKey;
pub use limiter::{Decision, RateLimiter};
pub use rule::{Rule, RuleConfig, TimeUnit};
