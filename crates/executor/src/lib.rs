//! # systest-executor
//!
//! Runs parsed test suites against live services and reports verdicts.
//!
//! - [`SuiteExecutor`]: per-case state machine, provisioning, injection, observation
//! - [`verifier`]: compares observed records with expectations
//! - [`SuiteReport`] / [`RunReport`]: structured results, JSON serializable
//! - [`JunitXmlWriter`]: `TEST-<suite>.xml` for CI
//!
//! # Example
//! ```ignore
//! let executor = SuiteExecutor::new(Arc::new(registry), ExecutorOptions::from_config(&config.executor));
//! let report = executor.run_all(&suites).await;
//! for line in ResultLogFormatter::format_issues(&report) {
//!     eprintln!("{line}");
//! }
//! ```

mod environment;
pub mod error;
pub mod junit;
pub mod matcher;
pub mod naming;
pub mod observe;
pub mod options;
pub mod orchestrator;
pub mod report;
pub mod verdict;
pub mod verifier;

pub use error::ExecutorError;
pub use junit::JunitXmlWriter;
pub use naming::InstanceNaming;
pub use observe::ObservedRecord;
pub use options::ExecutorOptions;
pub use orchestrator::SuiteExecutor;
pub use report::{ResultLogFormatter, RunReport, SuiteReport, Summary};
pub use verdict::{
    CaseCause, CaseState, CauseKind, ExpectationOutcome, ExpectationResult, LateRecord,
    MismatchError, ObservationTimeout, TeardownWarning, Verdict, VerdictStatus,
};
