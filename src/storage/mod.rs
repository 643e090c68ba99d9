pub mod schema;
pub mod writer;

pub use writer::{LeakRow, SessionSummary, Storage, query_leaks, query_samples, session_summary};
