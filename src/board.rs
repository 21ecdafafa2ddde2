/**
 * Health board
 *
 * Presentation-side consumer of refresh notifications. Refreshes are
 * coalesced: the first one opens a short debounce window and everything that
 * arrives before it closes is redrawn together. Once redraws have been quiet
 * for the settle window, one consolidated board of every tracked parent is
 * rendered.
 */
use crate::error::Result;
use crate::k8s::cache::config::{LAYOUT_SETTLE_SECONDS, REFRESH_DEBOUNCE_MILLIS};
use crate::k8s::cache::{HealthMonitor, HealthStatus, ParentHealth, Refresh};
use crate::k8s::resource::ParentResource;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use k8s_openapi::serde_json;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// One batch of changed rows
#[derive(Debug, Clone, Serialize)]
pub struct Redraw {
    pub at: DateTime<Utc>,
    pub updated: Vec<ParentHealth>,
    pub removed: Vec<String>,
}

impl Redraw {
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string(self)?),
            OutputFormat::Table => {
                let header = format!("{:<48} {:<8} {:>5}", "NAME", "STATUS", "PODS");
                let rows = self
                    .updated
                    .iter()
                    .map(|row| format!("{:<48} {:<8} {:>5}", row.name, row.status, row.pods))
                    .chain(
                        self.removed
                            .iter()
                            .map(|name| format!("{name:<48} {:<8} {:>5}", "REMOVED", "-")),
                    )
                    .join("\n");
                Ok(format!(
                    "--- {} ---\n{header}\n{rows}",
                    self.at.format("%H:%M:%S")
                ))
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct HealthBoard<P> {
    debounce: Duration,
    settle: Duration,
    /// Parents awaiting a redraw, by cache name
    pending: BTreeMap<String, P>,
    first_pending: Option<Instant>,
    last_redraw: Option<Instant>,
    /// A redraw happened since the last consolidated board
    unsettled: bool,
}

impl<P: ParentResource> Default for HealthBoard<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ParentResource> HealthBoard<P> {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_windows(
            Duration::from_millis(REFRESH_DEBOUNCE_MILLIS),
            Duration::from_secs(LAYOUT_SETTLE_SECONDS),
        )
    }

    #[must_use]
    pub const fn with_windows(debounce: Duration, settle: Duration) -> Self {
        Self {
            debounce,
            settle,
            pending: BTreeMap::new(),
            first_pending: None,
            last_redraw: None,
            unsettled: false,
        }
    }

    /// Queue a parent for the next redraw
    pub fn note(&mut self, refresh: &Refresh<P>, now: Instant) {
        self.pending
            .insert(refresh.parent.name().to_string(), refresh.parent.clone());
        self.first_pending.get_or_insert(now);
    }

    /// When the pending batch should be flushed, if anything is pending
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.first_pending.map(|first| first + self.debounce)
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Whether the settle window has passed since the last redraw
    #[must_use]
    pub fn is_settled(&self, now: Instant) -> bool {
        self.last_redraw
            .is_none_or(|last| now.saturating_duration_since(last) >= self.settle)
    }

    /// When the consolidated board is due, if a redraw is waiting to settle
    #[must_use]
    pub fn settle_deadline(&self) -> Option<Instant> {
        if !self.unsettled || !self.pending.is_empty() {
            return None;
        }
        self.last_redraw.map(|last| last + self.settle)
    }

    /// The consolidated board, once per burst of redraws
    pub fn settle(&mut self, monitor: &HealthMonitor<P>, now: Instant) -> Option<Redraw> {
        if !self.unsettled || !self.pending.is_empty() || !self.is_settled(now) {
            return None;
        }
        self.unsettled = false;
        Some(Self::full(monitor))
    }

    /// Build a redraw for everything pending, re-querying health now
    pub fn flush(&mut self, monitor: &HealthMonitor<P>, now: Instant) -> Option<Redraw> {
        if self.pending.is_empty() {
            return None;
        }

        let mut redraw = Redraw {
            at: Utc::now(),
            updated: Vec::new(),
            removed: Vec::new(),
        };
        let index = monitor.index();
        for parent in std::mem::take(&mut self.pending).into_values() {
            // rows are keyed like the index, matching `full`
            let key = (index.config().parent_identifier)(&parent);
            match index.check_health(&key) {
                HealthStatus::Unknown => redraw.removed.push(key),
                status => redraw.updated.push(ParentHealth {
                    pods: index.pod_count(&key),
                    status,
                    name: key,
                }),
            }
        }

        self.first_pending = None;
        self.last_redraw = Some(now);
        self.unsettled = true;
        Some(redraw)
    }

    /// A redraw of every tracked parent, for the first render
    #[must_use]
    pub fn full(monitor: &HealthMonitor<P>) -> Redraw {
        Redraw {
            at: Utc::now(),
            updated: monitor.health_report(),
            removed: Vec::new(),
        }
    }
}
