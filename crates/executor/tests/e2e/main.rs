//! E2E integration tests for systest-executor.
//!
//! These tests run parsed suites against mock providers and check the
//! case lifecycle, verdict mapping, verification and teardown accounting.
//!
//! # Test Structure
//!
//! - `helpers/` -- Shared test utilities (mock provider, suite builders, assertions)
//! - `scenarios/` -- Test files organized by concern
//!
//! All scenarios run on a paused tokio clock, so timeouts of seconds
//! complete instantly and record offsets are exact.
//!
//! # Running
//!
//! ```bash
//! cargo test -p systest-executor --test e2e
//! ```

mod helpers;
mod scenarios;
