//! E2E test scenarios.

mod fault_isolation;
mod lifecycle;
mod parallel;
mod timeouts;
mod verification;
