use crate::error::AppError;
use crate::market::types::PinnedGroup;
use std::collections::BTreeSet;
use tracing::debug;

/// Receiver of the minimal subscribe/unsubscribe operations.
pub trait SubscriptionSink {
    fn subscribe(&self, instrument_ids: Vec<String>) -> Result<(), AppError>;
    fn unsubscribe(&self, instrument_ids: Vec<String>) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub subscribe: Vec<String>,
    pub unsubscribe: Vec<String>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Instruments implied by the pinned set: the lead instrument of each binary group and the
/// instrument of every tracked outcome of each multi-outcome group.
pub fn desired_instruments(pinned_groups: &[PinnedGroup]) -> BTreeSet<String> {
    let mut desired = BTreeSet::new();
    for pinned in pinned_groups {
        if pinned.is_binary() {
            if let Some(instrument_id) = pinned.lead_instrument() {
                desired.insert(instrument_id.to_string());
            }
            continue;
        }
        desired.extend(
            pinned
                .outcome_series
                .iter()
                .filter(|series| !series.instrument_id.is_empty())
                .map(|series| series.instrument_id.clone()),
        );
    }
    desired
}

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    applied: BTreeSet<String>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> &BTreeSet<String> {
        &self.applied
    }

    /// Diffs `desired` against the last applied baseline and adopts it as the new baseline.
    pub fn diff(&mut self, desired: BTreeSet<String>) -> SubscriptionDiff {
        let diff = SubscriptionDiff {
            subscribe: desired.difference(&self.applied).cloned().collect(),
            unsubscribe: self.applied.difference(&desired).cloned().collect(),
        };
        self.applied = desired;
        diff
    }

    pub fn sync<S: SubscriptionSink + ?Sized>(
        &mut self,
        pinned_groups: &[PinnedGroup],
        sink: &S,
    ) -> Result<SubscriptionDiff, AppError> {
        let diff = self.diff(desired_instruments(pinned_groups));
        if diff.is_empty() {
            return Ok(diff);
        }

        debug!(
            subscribe = diff.subscribe.len(),
            unsubscribe = diff.unsubscribe.len(),
            "subscription set changed"
        );
        if !diff.unsubscribe.is_empty() {
            sink.unsubscribe(diff.unsubscribe.clone())?;
        }
        if !diff.subscribe.is_empty() {
            sink.subscribe(diff.subscribe.clone())?;
        }
        Ok(diff)
    }
}
