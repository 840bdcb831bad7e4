//! Metric names and descriptions.
//!
//! Every metric systest emits is named here. Call sites use the `metrics`
//! macros with these constants; without an installed recorder the calls
//! are no-ops.
//!
//! # Naming
//!
//! - prefix: `systest_`
//! - suffix: `_total` (counter), `_seconds` (histogram)
//!
//! ```ignore
//! metrics::counter!(systest_core::metrics::CASES_TOTAL, LABEL_STATUS => "passed").increment(1);
//! ```

// ─── Label keys ──────────────────────────────────────────────────────

/// Verdict status (passed, failed, errored, skipped)
pub const LABEL_STATUS: &str = "status";

/// Expectation outcome (matched, mismatched, timed_out)
pub const LABEL_OUTCOME: &str = "outcome";

/// Provider kind (docker, process, http, ...)
pub const LABEL_KIND: &str = "kind";

// ─── Executor ────────────────────────────────────────────────────────

/// Suites executed (counter)
pub const SUITES_TOTAL: &str = "systest_suites_total";

/// Cases finished, by status (counter)
pub const CASES_TOTAL: &str = "systest_cases_total";

/// Expectations evaluated, by outcome (counter)
pub const EXPECTATIONS_TOTAL: &str = "systest_expectations_total";

/// Wall time of one case from PENDING to TORN_DOWN (histogram)
pub const CASE_DURATION_SECONDS: &str = "systest_case_duration_seconds";

/// Provisioning plus readiness wait per service (histogram, label: kind)
pub const PROVISION_DURATION_SECONDS: &str = "systest_provision_duration_seconds";

/// Provisioning failures (counter, label: kind)
pub const PROVISION_FAILURES_TOTAL: &str = "systest_provision_failures_total";

/// Inputs delivered (counter, label: kind)
pub const INPUTS_DISPATCHED_TOTAL: &str = "systest_inputs_dispatched_total";

/// Records captured from services (counter, label: kind)
pub const RECORDS_OBSERVED_TOTAL: &str = "systest_records_observed_total";

/// Teardown calls that failed (counter, label: kind)
pub const TEARDOWN_FAILURES_TOTAL: &str = "systest_teardown_failures_total";

/// Provider panics caught (counter, label: kind)
pub const PROVIDER_CRASHES_TOTAL: &str = "systest_provider_crashes_total";

/// Registers a description for every metric above.
///
/// Call once after installing a recorder.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(SUITES_TOTAL, "Total number of suites executed");
    describe_counter!(CASES_TOTAL, "Test cases finished, labelled by verdict status");
    describe_counter!(
        EXPECTATIONS_TOTAL,
        "Expectations evaluated, labelled by outcome"
    );
    describe_histogram!(
        CASE_DURATION_SECONDS,
        "Time from case start to teardown completion in seconds"
    );
    describe_histogram!(
        PROVISION_DURATION_SECONDS,
        "Provisioning and readiness time per service in seconds"
    );
    describe_counter!(
        PROVISION_FAILURES_TOTAL,
        "Services that failed to provision or become ready"
    );
    describe_counter!(INPUTS_DISPATCHED_TOTAL, "Inputs delivered to services");
    describe_counter!(RECORDS_OBSERVED_TOTAL, "Output records captured from services");
    describe_counter!(
        TEARDOWN_FAILURES_TOTAL,
        "Teardown calls that returned an error or timed out"
    );
    describe_counter!(PROVIDER_CRASHES_TOTAL, "Provider panics converted into case errors");
}
