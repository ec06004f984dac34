// Seat-number results lookup: validation, a resilient upstream fetcher and the HTML surface around it

pub mod config;
pub mod outcome;
pub mod query;
pub mod render;
pub mod retry;
pub mod search;
pub mod server;
pub mod upstream;

// Re-export key types for convenience
pub use config::{AppConfig, ConfigError};
pub use outcome::{LookupOutcome, StudentResult};
pub use query::{validate, Level, LookupQuery, Region, SearchFields, ValidationError};
pub use render::Fragment;
pub use retry::{retry_with_backoff, Backoff, RetryError, RetryPolicy, Retried};
pub use search::handle_search_submission;
pub use upstream::{HttpResultFetcher, ResultFetcher, UpstreamConfig, UpstreamError};
