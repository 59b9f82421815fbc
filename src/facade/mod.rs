pub mod cache;
pub mod client;
pub mod quality;
pub mod router;

pub use cache::{CacheTier, TierTtls, TieredCache};
pub use client::RestClient;
pub use quality::{QualityConfig, QualityReport, QualityValidator};
pub use router::{DataFacade, FetchOutcome};
