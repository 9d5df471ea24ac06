//! Admission control around remote calls: synchronous lock, busy accounting, debounce.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{page::PageHost, params::RequestFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error("a synchronous submission is already in flight")]
    SubmissionInFlight,
}

/// Controls a call disabled on admission, with the registry timestamp each was claimed at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebounceClaim {
    entries: Vec<(String, i64)>,
}

impl DebounceClaim {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct GuardTicket {
    pub synchronous: bool,
    pub busy: bool,
    /// True for the call that took the busy count off idle with no timer pending.
    pub arm_busy_timer: bool,
    pub claim: DebounceClaim,
}

#[derive(Default)]
pub struct SubmissionGuard {
    submitting: bool,
    busy_count: u32,
    busy_timer: Option<JoinHandle<()>>,
    indicator_id: Option<String>,
    debounce: BTreeMap<String, i64>,
}

impl SubmissionGuard {
    pub fn new(indicator_id: Option<String>) -> Self {
        Self {
            indicator_id,
            ..Self::default()
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn busy_count(&self) -> u32 {
        self.busy_count
    }

    pub fn indicator_id(&self) -> Option<&str> {
        self.indicator_id.as_deref()
    }

    pub fn set_indicator_id(&mut self, id: impl Into<String>) {
        self.indicator_id = Some(id.into());
    }

    pub fn registered_at(&self, id: &str) -> Option<i64> {
        self.debounce.get(id).copied()
    }

    pub fn admit(
        &mut self,
        flags: RequestFlags,
        page: &dyn PageHost,
    ) -> Result<GuardTicket, GuardRejection> {
        if flags.synchronous {
            if self.submitting {
                debug!("guard: dropping synchronous call while another is in flight");
                return Err(GuardRejection::SubmissionInFlight);
            }
            self.submitting = true;
        }

        let mut arm_busy_timer = false;
        if flags.busy {
            self.busy_count += 1;
            arm_busy_timer = self.busy_timer.is_none();
        }

        let claim = if flags.debounced {
            self.claim_debounced(page)
        } else {
            DebounceClaim::default()
        };

        Ok(GuardTicket {
            synchronous: flags.synchronous,
            busy: flags.busy,
            arm_busy_timer,
            claim,
        })
    }

    fn claim_debounced(&self, page: &dyn PageHost) -> DebounceClaim {
        let mut entries = Vec::new();
        for (id, registered_at) in &self.debounce {
            let Some(control) = page.control(id) else {
                continue;
            };
            if control.disabled {
                continue;
            }
            page.set_disabled(id, true);
            entries.push((id.clone(), *registered_at));
        }
        DebounceClaim { entries }
    }

    /// Stores the pending display timer. A previously stored one is aborted.
    pub fn set_busy_timer(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.busy_timer.replace(handle) {
            previous.abort();
        }
    }

    /// Fired by the display timer. Shows the indicator when calls are still outstanding.
    pub fn busy_timer_elapsed(&mut self, page: &dyn PageHost) {
        self.busy_timer = None;
        if self.busy_count == 0 {
            return;
        }
        if let Some(id) = &self.indicator_id {
            page.set_busy_indicator(id, true);
        }
    }

    /// Clears the lock and busy accounting held by `ticket`. Debounce is released separately.
    pub fn release_call(&mut self, ticket: &GuardTicket, page: &dyn PageHost) {
        if ticket.synchronous {
            self.submitting = false;
        }
        if ticket.busy {
            self.busy_count = self.busy_count.saturating_sub(1);
            if self.busy_count == 0 {
                self.hide_busy_indicator(page);
            }
        }
    }

    fn hide_busy_indicator(&mut self, page: &dyn PageHost) {
        if let Some(timer) = self.busy_timer.take() {
            timer.abort();
        }
        if let Some(id) = &self.indicator_id {
            page.set_busy_indicator(id, false);
        }
    }

    /// Re-enables claimed controls whose registration has not moved since the claim.
    pub fn release_debounce(&self, claim: &DebounceClaim, page: &dyn PageHost) {
        for (id, claimed_at) in &claim.entries {
            if self.debounce.get(id) == Some(claimed_at) && page.contains(id) {
                page.set_disabled(id, false);
            }
        }
    }

    pub fn register_debounce(&mut self, ids: &[String], clear: bool, now_millis: i64) {
        if clear {
            self.debounce.clear();
        }
        for id in ids {
            self.debounce.insert(id.clone(), now_millis);
        }
    }

    pub fn reset(&mut self, page: &dyn PageHost) {
        self.submitting = false;
        self.busy_count = 0;
        self.hide_busy_indicator(page);
        self.debounce.clear();
    }
}

#[cfg(test)]
#[path = "tests/guard_tests.rs"]
mod tests;
