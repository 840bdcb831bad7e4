//! Suite execution.
//!
//! [`SuiteExecutor`] runs the cases of a suite and returns one
//! [`Verdict`] per declared case. Each case moves through
//!
//! ```text
//! PENDING → PROVISIONING → READY → INJECTING → OBSERVING → VERIFYING → TORN_DOWN
//!                  └──────────┴─────────┴───────────┴───────────┴──→ FAILED
//! ```
//!
//! with its own [`ExecutionEnvironment`], released unconditionally after the
//! case whatever happened inside it.
//!
//! # Case clock
//!
//! The clock starts when every service is ready. Input delays, record
//! offsets and expectation windows are all measured from that instant.
//!
//! # Case timeout
//!
//! Each case is bounded by the sum of its phase timeouts plus a grace
//! period. When the case timeout and any inner timeout expire together, the
//! case timeout wins.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::future::{join_all, try_join_all};
use futures_util::stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use systest_core::error::ProviderError;
use systest_core::metrics::{
    CASE_DURATION_SECONDS, CASES_TOTAL, EXPECTATIONS_TOTAL, INPUTS_DISPATCHED_TOTAL, LABEL_KIND,
    LABEL_OUTCOME, LABEL_STATUS, PROVISION_DURATION_SECONDS, PROVISION_FAILURES_TOTAL,
    RECORDS_OBSERVED_TOTAL, SUITES_TOTAL,
};
use systest_core::model::{Disabled, Expectation, ReadinessProbe, ServiceRef, TestCase, TestSuite};
use systest_core::registry::ProviderRegistry;

use crate::environment::{ExecutionEnvironment, ProvisionResult};
use crate::naming::InstanceNaming;
use crate::observe::{self, ObservedRecord};
use crate::options::ExecutorOptions;
use crate::report::{RunReport, SuiteReport};
use crate::verdict::{
    CaseCause, CaseState, CauseKind, ExpectationResult, TeardownWarning, Verdict, VerdictStatus,
};
use crate::verifier;

/// Runs test suites against providers from a registry.
///
/// # Example
/// ```ignore
/// let executor = SuiteExecutor::new(Arc::new(registry), ExecutorOptions::default());
/// let report = executor.run(&suite).await;
/// assert!(report.summary.is_success());
/// ```
pub struct SuiteExecutor {
    registry: Arc<ProviderRegistry>,
    options: ExecutorOptions,
    naming: InstanceNaming,
    run_id: Uuid,
    cancel: CancellationToken,
    /// Set after the first non-passing case when `stop_on_first_failure` is on.
    stopped: AtomicBool,
}

impl SuiteExecutor {
    pub fn new(registry: Arc<ProviderRegistry>, options: ExecutorOptions) -> Self {
        Self {
            registry,
            options,
            naming: InstanceNaming::new(),
            run_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Cancelling this token aborts running cases; they still tear down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one suite.
    pub async fn run(&self, suite: &TestSuite) -> SuiteReport {
        self.stopped.store(false, Ordering::SeqCst);
        self.execute_suite(suite).await
    }

    /// Runs suites in order. `stop_on_first_failure` spans suites.
    pub async fn run_all(&self, suites: &[TestSuite]) -> RunReport {
        self.stopped.store(false, Ordering::SeqCst);
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(suites.len());
        for suite in suites {
            reports.push(self.execute_suite(suite).await);
        }
        RunReport {
            run_id: self.run_id,
            started_at,
            suites: reports,
        }
    }

    async fn execute_suite(&self, suite: &TestSuite) -> SuiteReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(
            suite = %suite.name,
            cases = suite.cases.len(),
            parallel = self.options.parallel_cases,
            "running suite"
        );
        metrics::counter!(SUITES_TOTAL).increment(1);

        let verdicts = if self.options.parallel_cases <= 1 {
            let mut verdicts = Vec::with_capacity(suite.cases.len());
            for case in &suite.cases {
                verdicts.push(self.run_case(suite, case).await);
            }
            verdicts
        } else {
            let mut indexed: Vec<(usize, Verdict)> = stream::iter(suite.cases.iter().enumerate())
                .map(|(i, case)| async move { (i, self.run_case(suite, case).await) })
                .buffer_unordered(self.options.parallel_cases)
                .collect()
                .await;
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, v)| v).collect()
        };

        let report = SuiteReport::new(suite, self.run_id, started_at, clock.elapsed(), verdicts);
        tracing::info!(
            suite = %suite.name,
            passed = report.summary.passed,
            failed = report.summary.failed,
            errored = report.summary.errored,
            skipped = report.summary.skipped,
            duration_ms = report.duration_ms,
            "suite finished"
        );
        report
    }

    async fn run_case(&self, suite: &TestSuite, case: &TestCase) -> Verdict {
        if let Some(disabled) = suite.disabled.as_ref().or(case.disabled.as_ref()) {
            return self.record(suite, skipped(case, disabled));
        }
        if self.stopped.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            return self.record(suite, aborted(case, None, Vec::new(), Duration::ZERO));
        }

        let started = Instant::now();
        let run = CaseRun::new(&suite.name, &case.name);
        let env = ExecutionEnvironment::new(&case.name);
        let budget = self.case_budget(case);

        let outcome = tokio::select! {
            biased;
            () = tokio::time::sleep(budget) => CaseOutcome::TimedOut(budget),
            () = self.cancel.cancelled() => CaseOutcome::Aborted,
            outcome = self.drive(&run, case, &env) => outcome,
        };

        let last_state = run.state();
        let warnings = env.teardown_all(self.options.teardown_timeout).await;
        let verdict = conclude(case, outcome, last_state, warnings, started.elapsed());
        run.enter(verdict.state);

        if self.options.stop_on_first_failure && verdict.is_failure() {
            self.stopped.store(true, Ordering::SeqCst);
        }
        self.record(suite, verdict)
    }

    /// Logs and counts a finished verdict.
    fn record(&self, suite: &TestSuite, verdict: Verdict) -> Verdict {
        match &verdict.cause {
            Some(cause) => tracing::info!(
                suite = %suite.name,
                case = %verdict.case,
                status = %verdict.status,
                cause = %cause,
                duration_ms = verdict.duration_ms,
                "case finished"
            ),
            None => tracing::info!(
                suite = %suite.name,
                case = %verdict.case,
                status = %verdict.status,
                duration_ms = verdict.duration_ms,
                "case finished"
            ),
        }
        metrics::counter!(CASES_TOTAL, LABEL_STATUS => verdict.status.as_str()).increment(1);
        metrics::histogram!(CASE_DURATION_SECONDS).record(verdict.duration_ms as f64 / 1000.0);
        for result in &verdict.expectations {
            metrics::counter!(EXPECTATIONS_TOTAL, LABEL_OUTCOME => result.outcome.label())
                .increment(1);
        }
        verdict
    }

    /// Readiness, dispatch and observation bounds summed, plus grace.
    fn case_budget(&self, case: &TestCase) -> Duration {
        let inputs = u32::try_from(case.dispatch_order().count()).unwrap_or(u32::MAX);
        let last_delay = case
            .dispatch_order()
            .map(|i| i.delay)
            .max()
            .unwrap_or_default();
        case.max_readiness_timeout()
            .saturating_add(last_delay)
            .saturating_add(self.options.dispatch_timeout.saturating_mul(inputs))
            .saturating_add(case.max_expectation_timeout())
            .saturating_add(self.options.case_timeout_grace)
    }

    async fn drive(
        &self,
        run: &CaseRun<'_>,
        case: &TestCase,
        env: &Arc<ExecutionEnvironment>,
    ) -> CaseOutcome {
        run.enter(CaseState::Provisioning);
        if let Err(e) = self.provision_all(case, env).await {
            return CaseOutcome::Errored(e);
        }

        run.enter(CaseState::Ready);
        let case_start = Instant::now();

        // capture before the first input so nothing is missed
        let observed = observed_services(case);
        let mut streams = Vec::with_capacity(observed.len());
        for service in &observed {
            match env.capture(service, case_start).await {
                Ok(stream) => streams.push((service.as_str(), stream)),
                Err(e) => return CaseOutcome::Errored(e),
            }
        }

        run.enter(CaseState::Injecting);
        let seq = AtomicU64::new(0);
        let seq = &seq;
        let observers = join_all(streams.into_iter().map(|(service, stream)| {
            let expectations: Vec<Expectation> = case
                .expectations
                .iter()
                .filter(|e| e.service == service)
                .cloned()
                .collect();
            let window = expectations
                .iter()
                .map(|e| e.timeout)
                .max()
                .unwrap_or_default();
            async move {
                observe::observe(
                    service,
                    stream,
                    case_start,
                    case_start + window,
                    seq,
                    &expectations,
                )
                .await
            }
        }));

        let injection = self.inject_all(run, case, env, case_start);
        let observation = async { Ok::<_, ProviderError>(observers.await) };
        let mut records: Vec<ObservedRecord> = match tokio::try_join!(injection, observation) {
            Ok(((), per_service)) => per_service.into_iter().flatten().collect(),
            Err(e) => return CaseOutcome::Errored(e),
        };
        records.sort_by_key(|r| r.seq);
        for service in &observed {
            let count = records.iter().filter(|r| &r.service == service).count();
            let kind = env.kind_of(service).unwrap_or_default();
            metrics::counter!(RECORDS_OBSERVED_TOTAL, LABEL_KIND => kind).increment(count as u64);
        }

        run.enter(CaseState::Verifying);
        CaseOutcome::Verified(verifier::verify(&case.expectations, &records))
    }

    /// Provisions every case service concurrently. The first failure stops
    /// waiting on the others.
    async fn provision_all(
        &self,
        case: &TestCase,
        env: &Arc<ExecutionEnvironment>,
    ) -> Result<(), ProviderError> {
        try_join_all(case.services.iter().map(|svc| self.provision_one(svc, env))).await?;
        Ok(())
    }

    async fn provision_one(
        &self,
        svc: &ServiceRef,
        env: &Arc<ExecutionEnvironment>,
    ) -> Result<(), ProviderError> {
        let def = &svc.definition;
        let provider = self
            .registry
            .resolve(&def.kind)
            .map_err(|e| ProviderError::Provisioning {
                service: svc.name.clone(),
                reason: e.to_string(),
            })?;
        let id = self.naming.next(&svc.name);
        tracing::debug!(
            service = %svc.name,
            instance = %id.instance,
            kind = %def.kind,
            "provisioning service"
        );

        let started = Instant::now();
        let provisioned = env.provision(provider, id, Arc::clone(def));
        let probe = &def.readiness;
        let result = match tokio::time::timeout(
            probe.timeout,
            wait_ready(env, &svc.name, &def.kind, provisioned, probe),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::NotReady {
                service: svc.name.clone(),
                timeout_ms: u64::try_from(probe.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        metrics::histogram!(PROVISION_DURATION_SECONDS, LABEL_KIND => def.kind.clone())
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!(PROVISION_FAILURES_TOTAL, LABEL_KIND => def.kind.clone()).increment(1);
            tracing::debug!(service = %svc.name, error = %e, "provisioning failed");
        }
        result
    }

    async fn inject_all(
        &self,
        run: &CaseRun<'_>,
        case: &TestCase,
        env: &ExecutionEnvironment,
        case_start: Instant,
    ) -> Result<(), ProviderError> {
        for input in case.dispatch_order() {
            tokio::time::sleep_until(case_start + input.delay).await;
            let kind = env.inject(input, self.options.dispatch_timeout).await?;
            tracing::trace!(
                service = %input.service,
                origin = input.origin.as_deref().unwrap_or("-"),
                "input dispatched"
            );
            metrics::counter!(INPUTS_DISPATCHED_TOTAL, LABEL_KIND => kind).increment(1);
        }
        run.enter(CaseState::Observing);
        Ok(())
    }
}

async fn wait_ready(
    env: &ExecutionEnvironment,
    service: &str,
    kind: &str,
    provisioned: ProvisionResult,
    probe: &ReadinessProbe,
) -> Result<(), ProviderError> {
    provisioned.await.map_err(|_| ProviderError::Crashed {
        kind: kind.to_owned(),
        reason: format!("provisioning of '{service}' ended without a result"),
    })??;
    env.await_ready(service, probe).await
}

/// Services some expectation watches, in case order.
fn observed_services(case: &TestCase) -> Vec<String> {
    let watched: BTreeSet<&str> = case.expectations.iter().map(|e| e.service.as_str()).collect();
    case.services
        .iter()
        .filter(|s| watched.contains(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect()
}

enum CaseOutcome {
    Verified(Vec<ExpectationResult>),
    Errored(ProviderError),
    TimedOut(Duration),
    Aborted,
}

/// State of one running case, logged on every transition.
struct CaseRun<'a> {
    suite: &'a str,
    case: &'a str,
    state: Mutex<CaseState>,
}

impl<'a> CaseRun<'a> {
    fn new(suite: &'a str, case: &'a str) -> Self {
        Self {
            suite,
            case,
            state: Mutex::new(CaseState::Pending),
        }
    }

    fn enter(&self, next: CaseState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(
            suite = self.suite,
            case = self.case,
            from = %*state,
            state = %next,
            "case state"
        );
        *state = next;
    }

    fn state(&self) -> CaseState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn conclude(
    case: &TestCase,
    outcome: CaseOutcome,
    last_state: CaseState,
    teardown_warnings: Vec<TeardownWarning>,
    elapsed: Duration,
) -> Verdict {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let cause = |kind: CauseKind, message: String| CaseCause {
        kind,
        message,
        state: Some(last_state),
    };

    let (status, cause, expectations) = match outcome {
        CaseOutcome::Verified(results) => {
            let failed = results.iter().filter(|r| !r.outcome.is_success()).count();
            if failed == 0 {
                (VerdictStatus::Passed, None, results)
            } else {
                let message = format!("{failed} of {} expectations failed", results.len());
                (
                    VerdictStatus::Failed,
                    Some(cause(CauseKind::Expectations, message)),
                    results,
                )
            }
        }
        CaseOutcome::Errored(err) => {
            let kind = match &err {
                ProviderError::Dispatch { .. } => CauseKind::Dispatch,
                ProviderError::Capture { .. } => CauseKind::Capture,
                ProviderError::Crashed { .. } | ProviderError::HandleMismatch { .. } => {
                    CauseKind::ProviderCrash
                }
                _ => CauseKind::Provisioning,
            };
            (kind.status(), Some(cause(kind, err.to_string())), unevaluated(case))
        }
        CaseOutcome::TimedOut(budget) => (
            VerdictStatus::Failed,
            Some(cause(
                CauseKind::CaseTimeout,
                format!("case timed out after {} ms", budget.as_millis()),
            )),
            unevaluated(case),
        ),
        CaseOutcome::Aborted => {
            return aborted(case, Some(last_state), teardown_warnings, elapsed);
        }
    };

    Verdict {
        case: case.name.clone(),
        status,
        state: if status == VerdictStatus::Passed {
            CaseState::TornDown
        } else {
            CaseState::Failed
        },
        cause,
        expectations,
        duration_ms,
        teardown_warnings,
    }
}

fn aborted(
    case: &TestCase,
    state: Option<CaseState>,
    teardown_warnings: Vec<TeardownWarning>,
    elapsed: Duration,
) -> Verdict {
    Verdict {
        case: case.name.clone(),
        status: VerdictStatus::Failed,
        state: CaseState::Failed,
        cause: Some(CaseCause {
            kind: CauseKind::Aborted,
            message: "aborted".to_owned(),
            state,
        }),
        expectations: unevaluated(case),
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        teardown_warnings,
    }
}

fn skipped(case: &TestCase, disabled: &Disabled) -> Verdict {
    Verdict {
        case: case.name.clone(),
        status: VerdictStatus::Skipped,
        state: CaseState::Pending,
        cause: Some(CaseCause {
            kind: CauseKind::Disabled,
            message: disabled.to_string(),
            state: None,
        }),
        expectations: unevaluated(case),
        duration_ms: 0,
        teardown_warnings: Vec::new(),
    }
}

fn unevaluated(case: &TestCase) -> Vec<ExpectationResult> {
    case.expectations
        .iter()
        .enumerate()
        .map(|(i, e)| verifier::not_evaluated(i, e))
        .collect()
}
