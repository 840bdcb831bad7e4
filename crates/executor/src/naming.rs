//! Unique instance names within one run.

use std::sync::atomic::{AtomicU64, Ordering};

use systest_core::provider::InstanceId;

/// Hands out `<service>-<n>` names. `n` grows across every service of the run,
/// so a service provisioned again by a later case gets a fresh name.
#[derive(Debug, Default)]
pub struct InstanceNaming {
    next: AtomicU64,
}

impl InstanceNaming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, service: &str) -> InstanceId {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        InstanceId {
            service: service.to_owned(),
            instance: format!("{service}-{n}"),
        }
    }
}
