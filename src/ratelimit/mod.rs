//! Rate limiting logic and state management.

mod clock;
mod decision;
mod key;
mod limiter;
mod rules;
mod store;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{RateLimitResult, Throttled};
pub use key::WindowKey;
pub use limiter::RateLimiter;
pub use rules::{Action, ActionPolicy, PolicySet};
pub use store::WindowStore;
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};
pub use window::RateWindow;
