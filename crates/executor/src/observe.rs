//! Timestamped observation of captured output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use systest_core::model::{Expectation, ExpectationKind};
use systest_core::provider::RecordStream;

use crate::verifier;

/// An output record as the executor saw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedRecord {
    /// Arrival order across every service of the case.
    pub seq: u64,
    pub service: String,
    pub channel: String,
    /// Arrival time relative to the case clock.
    #[serde(rename = "offset_ms", serialize_with = "as_millis")]
    pub offset: Duration,
    pub payload: Value,
}

impl ObservedRecord {
    pub fn offset_ms(&self) -> u64 {
        u64::try_from(self.offset.as_millis()).unwrap_or(u64::MAX)
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Reads one service's capture stream until `until`, the stream closes, or
/// every record expectation on the service is already matched.
///
/// Early exit is disabled when any of `expectations` is `no_extra_output`,
/// since that needs the whole window.
pub(crate) async fn observe(
    service: &str,
    mut stream: RecordStream,
    case_start: Instant,
    until: Instant,
    seq: &AtomicU64,
    expectations: &[Expectation],
) -> Vec<ObservedRecord> {
    let early_exit = !expectations.is_empty()
        && expectations
            .iter()
            .all(|e| matches!(e.kind, ExpectationKind::Record(_)));
    let mut records = Vec::new();

    loop {
        match tokio::time::timeout_at(until, stream.recv()).await {
            Ok(Some(observation)) => {
                let record = ObservedRecord {
                    seq: seq.fetch_add(1, Ordering::SeqCst),
                    service: service.to_owned(),
                    channel: observation.channel,
                    offset: Instant::now().saturating_duration_since(case_start),
                    payload: observation.payload,
                };
                tracing::trace!(
                    service = service,
                    channel = %record.channel,
                    seq = record.seq,
                    offset_ms = record.offset_ms(),
                    "record observed"
                );
                records.push(record);
                if early_exit && verifier::all_matched(expectations, &records) {
                    tracing::debug!(service = service, "all expectations matched, stopping capture");
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(service = service, "capture stream closed");
                break;
            }
            Err(_) => break,
        }
    }

    records
}
