pub mod circuit;
pub mod health;
pub mod rate_limit;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use health::{ProviderHealth, ProviderHealthTracker};
pub use rate_limit::{BudgetSnapshot, RateLimiter};
