//! Expectation verification.
//!
//! Records and expectations are grouped by `(service, channel)`; groups are
//! independent. Within a group, a record is in an expectation's window when
//! its offset is at most the expectation's timeout, and each record satisfies
//! at most one expectation. Evaluation order inside a group:
//!
//! 1. `ordered` expectations, in declaration order, each taking the earliest
//!    matching record after the one taken by its predecessor
//! 2. `unordered` expectations, as a maximum bipartite matching over the
//!    records left, trying earlier records first
//! 3. while an `unordered` expectation is left without a record that an
//!    `ordered` one holds, the ordered chain is re-run without that record
//!    and the result kept if more expectations match
//! 4. `no_extra_output`, which fails on any record still unclaimed
//!
//! An `ordered` expectation whose only match arrived before its predecessor's
//! is a mismatch. Any other unmatched expectation timed out, whatever else
//! the channel carried.

use std::collections::BTreeMap;

use systest_core::model::{Expectation, ExpectationKind, Matcher, OrderingMode};

use crate::matcher;
use crate::observe::ObservedRecord;
use crate::verdict::{
    ExpectationOutcome, ExpectationResult, LateRecord, MismatchError, ObservationTimeout,
};

/// Evaluates every expectation against the observed records.
///
/// Returns one result per expectation, in declaration order. Pure: the same
/// inputs always give the same results.
pub fn verify(expectations: &[Expectation], records: &[ObservedRecord]) -> Vec<ExpectationResult> {
    let outcomes = evaluate(expectations, records);
    expectations
        .iter()
        .zip(outcomes)
        .enumerate()
        .map(|(index, (exp, outcome))| result(index, exp, outcome))
        .collect()
}

/// Whether every expectation already holds on `records`.
pub fn all_matched(expectations: &[Expectation], records: &[ObservedRecord]) -> bool {
    evaluate(expectations, records)
        .iter()
        .all(ExpectationOutcome::is_success)
}

/// A result for an expectation that was never evaluated.
pub fn not_evaluated(index: usize, exp: &Expectation) -> ExpectationResult {
    result(index, exp, ExpectationOutcome::NotEvaluated)
}

fn result(index: usize, exp: &Expectation, outcome: ExpectationOutcome) -> ExpectationResult {
    ExpectationResult {
        index,
        service: exp.service.clone(),
        channel: exp.channel.clone(),
        expected: match &exp.kind {
            ExpectationKind::Record(m) => m.to_string(),
            ExpectationKind::NoExtraOutput => "no extra output".to_owned(),
        },
        location: exp.location.to_string(),
        outcome,
    }
}

fn evaluate(expectations: &[Expectation], records: &[ObservedRecord]) -> Vec<ExpectationOutcome> {
    let mut outcomes = vec![ExpectationOutcome::NotEvaluated; expectations.len()];

    let mut groups: BTreeMap<(&str, &str), Vec<usize>> = BTreeMap::new();
    for (i, exp) in expectations.iter().enumerate() {
        groups.entry(exp.target()).or_default().push(i);
    }

    for ((service, channel), indices) in groups {
        let mut on_channel: Vec<&ObservedRecord> = records
            .iter()
            .filter(|r| r.service == service && r.channel == channel)
            .collect();
        on_channel.sort_by_key(|r| (r.offset, r.seq));

        let mut group = Group {
            expectations,
            claimed: vec![false; on_channel.len()],
            records: on_channel,
        };
        group.evaluate(&indices, &mut outcomes);
    }

    outcomes
}

struct Group<'a> {
    expectations: &'a [Expectation],
    /// Records on this channel, in arrival order.
    records: Vec<&'a ObservedRecord>,
    claimed: Vec<bool>,
}

/// One pairing of a group's expectations with its records.
struct Assignment {
    /// Expectation holding each record.
    holder: Vec<Option<usize>>,
    /// Records held by `ordered` expectations.
    ordered: Vec<bool>,
    /// `ordered` expectations left without a record, with the cursor they searched from.
    ordered_failed: Vec<(usize, usize)>,
    unordered_failed: Vec<usize>,
}

impl Assignment {
    fn matched(&self) -> usize {
        self.holder.iter().flatten().count()
    }
}

impl Group<'_> {
    fn evaluate(&mut self, indices: &[usize], outcomes: &mut [ExpectationOutcome]) {
        let expectations = self.expectations;

        let mut reserved = vec![false; self.records.len()];
        let mut best = self.assign(indices, &reserved);
        while let Some(better) = self.reassign(indices, &mut reserved, &best) {
            best = better;
        }

        for (r, holder) in best.holder.iter().enumerate() {
            if let Some(i) = *holder {
                self.claimed[r] = true;
                outcomes[i] = self.matched(r);
            }
        }
        for &(i, cursor) in &best.ordered_failed {
            let exp = &expectations[i];
            outcomes[i] = self
                .out_of_order(exp, cursor)
                .unwrap_or_else(|| self.unmatched(exp));
        }
        for &i in &best.unordered_failed {
            outcomes[i] = self.unmatched(&expectations[i]);
        }

        // no extra output
        for &i in indices {
            let exp = &expectations[i];
            if exp.kind == ExpectationKind::NoExtraOutput {
                outcomes[i] = self.no_extra_output(exp);
            }
        }
    }

    /// Pairs expectations with records. `reserved` records are skipped by the
    /// ordered chain only.
    fn assign(&self, indices: &[usize], reserved: &[bool]) -> Assignment {
        let len = self.records.len();
        let mut holder = vec![None; len];
        let mut ordered = vec![false; len];
        let mut ordered_failed = Vec::new();

        let mut cursor = 0;
        for &i in indices {
            let exp = &self.expectations[i];
            let Some(m) = record_matcher(exp, OrderingMode::Ordered) else {
                continue;
            };
            match (cursor..len).find(|&r| !reserved[r] && self.usable(exp, m, r)) {
                Some(r) => {
                    holder[r] = Some(i);
                    ordered[r] = true;
                    cursor = r + 1;
                }
                None => ordered_failed.push((i, cursor)),
            }
        }

        let unordered: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| record_matcher(&self.expectations[i], OrderingMode::Unordered).is_some())
            .collect();
        let mut owner: Vec<Option<usize>> = vec![None; len];
        let mut unordered_failed = Vec::new();
        for k in 0..unordered.len() {
            // records held by the ordered chain are off limits
            let mut visited = ordered.clone();
            if !self.augment(k, &unordered, &mut owner, &mut visited) {
                unordered_failed.push(unordered[k]);
            }
        }
        for (r, k) in owner.iter().enumerate() {
            if let Some(k) = k {
                holder[r] = Some(unordered[*k]);
            }
        }

        Assignment {
            holder,
            ordered,
            ordered_failed,
            unordered_failed,
        }
    }

    /// Takes a record a failed unordered expectation could use away from the
    /// ordered chain, if that matches more expectations. The record stays
    /// reserved on success.
    fn reassign(
        &self,
        indices: &[usize],
        reserved: &mut [bool],
        current: &Assignment,
    ) -> Option<Assignment> {
        for &u in &current.unordered_failed {
            let exp = &self.expectations[u];
            let Some(m) = exp.matcher() else {
                continue;
            };
            for r in 0..self.records.len() {
                if reserved[r] || !current.ordered[r] || !self.usable(exp, m, r) {
                    continue;
                }
                reserved[r] = true;
                let next = self.assign(indices, reserved);
                if next.matched() > current.matched() {
                    return Some(next);
                }
                reserved[r] = false;
            }
        }
        None
    }

    /// Kuhn's augmenting path for unordered expectation `k`.
    fn augment(
        &self,
        k: usize,
        unordered: &[usize],
        owner: &mut [Option<usize>],
        visited: &mut [bool],
    ) -> bool {
        let exp = &self.expectations[unordered[k]];
        let Some(m) = exp.matcher() else {
            return false;
        };
        for r in 0..self.records.len() {
            if visited[r] || !self.usable(exp, m, r) {
                continue;
            }
            visited[r] = true;
            let free = match owner[r] {
                None => true,
                Some(other) => self.augment(other, unordered, owner, visited),
            };
            if free {
                owner[r] = Some(k);
                return true;
            }
        }
        false
    }

    fn usable(&self, exp: &Expectation, m: &Matcher, r: usize) -> bool {
        self.in_window(exp, r) && matcher::is_match(m, &self.records[r].payload)
    }

    fn in_window(&self, exp: &Expectation, r: usize) -> bool {
        self.records[r].offset <= exp.timeout
    }

    fn matched(&self, r: usize) -> ExpectationOutcome {
        let record = self.records[r];
        ExpectationOutcome::Matched {
            seq: record.seq,
            offset_ms: record.offset_ms(),
        }
    }

    /// A matching record, still unclaimed, that arrived before the ordered
    /// chain reached `cursor`.
    fn out_of_order(&self, exp: &Expectation, cursor: usize) -> Option<ExpectationOutcome> {
        let m = exp.matcher()?;
        let r = (0..cursor).find(|&r| !self.claimed[r] && self.usable(exp, m, r))?;
        let record = self.records[r];
        Some(ExpectationOutcome::Mismatched(MismatchError {
            reason: format!(
                "matching record #{} at {} ms arrived out of order",
                record.seq,
                record.offset_ms()
            ),
            actual: Some(record.payload.clone()),
            diff: Vec::new(),
        }))
    }

    fn unmatched(&self, exp: &Expectation) -> ExpectationOutcome {
        let len = self.records.len();
        let m = exp.matcher();
        let nearest = (0..len)
            .find(|&r| !self.claimed[r] && self.in_window(exp, r))
            .map(|r| &self.records[r].payload);
        let late = m.and_then(|m| {
            (0..len).find(|&r| {
                !self.claimed[r]
                    && !self.in_window(exp, r)
                    && matcher::is_match(m, &self.records[r].payload)
            })
        });

        ExpectationOutcome::TimedOut(ObservationTimeout {
            timeout_ms: u64::try_from(exp.timeout.as_millis()).unwrap_or(u64::MAX),
            records_seen: (0..len).filter(|&r| self.in_window(exp, r)).count(),
            late: late.map(|r| LateRecord {
                seq: self.records[r].seq,
                offset_ms: self.records[r].offset_ms(),
            }),
            actual: nearest.cloned(),
            diff: match (m, nearest) {
                (Some(m), Some(payload)) => matcher::diff(m, payload),
                _ => Vec::new(),
            },
        })
    }

    fn no_extra_output(&self, exp: &Expectation) -> ExpectationOutcome {
        let extra: Vec<&ObservedRecord> = (0..self.records.len())
            .filter(|&r| !self.claimed[r] && self.in_window(exp, r))
            .map(|r| self.records[r])
            .collect();
        let Some(first) = extra.first() else {
            return ExpectationOutcome::Satisfied;
        };
        ExpectationOutcome::Mismatched(MismatchError {
            reason: format!("{} unexpected record(s)", extra.len()),
            actual: Some(first.payload.clone()),
            diff: extra
                .iter()
                .map(|r| format!("#{} at {} ms: {}", r.seq, r.offset_ms(), r.payload))
                .collect(),
        })
    }
}

fn record_matcher(exp: &Expectation, ordering: OrderingMode) -> Option<&Matcher> {
    if exp.ordering != ordering {
        return None;
    }
    exp.matcher()
}
