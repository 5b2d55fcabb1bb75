//! Site liveness checking: the HTTP fetcher, its retry policy, and the
//! classifier that turns a response or transport failure into a verdict.

pub mod classifier;
pub mod fetcher;
pub mod retry;
pub mod rules;
pub mod verdict;

pub use fetcher::{Fetcher, SiteChecker};
pub use verdict::Verdict;
