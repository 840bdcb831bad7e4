//! Shared E2E test helpers.
//!
//! Provides a configurable mock provider, suite parsing shortcuts and
//! verdict assertions.

pub mod assertions;
pub mod mock_provider;
pub mod suites;
