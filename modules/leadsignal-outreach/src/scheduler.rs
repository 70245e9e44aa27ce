//! The outreach loop: load candidates, filter them through the record store,
//! contact a bounded number, record outcomes, pace, repeat.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use leadsignal_common::{Candidate, Config, DelayWindow, IdentityKey, Outcome};
use leadsignal_ledger::{RecordRequest, RecordStore};

use crate::channel::{ContactChannel, Delivery, FailureClassifier};
use crate::composer::MessageComposer;
use crate::lead_source::LeadSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    LoadingLeads,
    Filtering,
    Attempting,
    CoolingDown,
    CycleCooldown,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LoadingLeads => write!(f, "loading_leads"),
            Self::Filtering => write!(f, "filtering"),
            Self::Attempting => write!(f, "attempting"),
            Self::CoolingDown => write!(f, "cooling_down"),
            Self::CycleCooldown => write!(f, "cycle_cooldown"),
        }
    }
}

/// Counters for one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub candidates: u64,
    pub incomplete: u64,
    pub already_known: u64,
    pub duplicate_in_cycle: u64,
    pub attempted: u64,
    pub contacted: u64,
    pub permanently_skipped: u64,
    pub transient_failures: u64,
    pub escalated: u64,
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidates={} incomplete={} already_known={} duplicate_in_cycle={} attempted={} contacted={} permanently_skipped={} transient_failures={} escalated={}",
            self.candidates,
            self.incomplete,
            self.already_known,
            self.duplicate_in_cycle,
            self.attempted,
            self.contacted,
            self.permanently_skipped,
            self.transient_failures,
            self.escalated,
        )
    }
}

/// Per-cycle budget and pacing.
#[derive(Debug, Clone)]
pub struct OutreachSettings {
    pub max_attempts: u32,
    pub attempt_delay: DelayWindow,
    pub cycle_delay: DelayWindow,
    pub send_timeout: Duration,
    /// Record an identity as `error` after this many transient failures.
    pub escalate_after_transient: Option<u32>,
}

impl OutreachSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts_per_cycle,
            attempt_delay: config.attempt_delay,
            cycle_delay: config.cycle_delay,
            send_timeout: config.send_timeout,
            escalate_after_transient: config.escalate_after_transient,
        }
    }
}

/// Order candidates by priority (stable, so ties keep discovery order) and
/// drop everything that must not be attempted this cycle: incomplete
/// identities, identities the store already holds, and repeats of a handle or
/// locator chosen earlier in the same cycle.
pub fn select_candidates(
    mut candidates: Vec<Candidate>,
    store: &RecordStore,
    stats: &mut CycleStats,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.lead.priority.cmp(&a.lead.priority));

    let mut cycle_handles: HashSet<String> = HashSet::new();
    let mut cycle_locators: HashSet<String> = HashSet::new();
    let mut selected = Vec::new();

    for candidate in candidates {
        let key = candidate.key();
        if !key.is_complete() {
            stats.incomplete += 1;
            continue;
        }
        if store.contains_key(key) {
            stats.already_known += 1;
            debug!(identity = %key, "Already recorded, skipping");
            continue;
        }
        if cycle_handles.contains(&key.handle) || cycle_locators.contains(&key.locator) {
            stats.duplicate_in_cycle += 1;
            continue;
        }
        cycle_handles.insert(key.handle.clone());
        cycle_locators.insert(key.locator.clone());
        selected.push(candidate);
    }

    selected
}

/// Sleep for `duration` unless shutdown is requested first. Returns `false`
/// when interrupted.
async fn sleep_or_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The outreach scheduler. Owns the record store for its lifetime.
pub struct Outreach {
    leads: Arc<dyn LeadSource>,
    channel: Arc<dyn ContactChannel>,
    store: RecordStore,
    composer: MessageComposer,
    classifier: FailureClassifier,
    settings: OutreachSettings,
    transient_failures: HashMap<IdentityKey, u32>,
    phase: CyclePhase,
}

impl Outreach {
    pub fn new(
        leads: Arc<dyn LeadSource>,
        channel: Arc<dyn ContactChannel>,
        store: RecordStore,
        composer: MessageComposer,
        classifier: FailureClassifier,
        settings: OutreachSettings,
    ) -> Self {
        Self {
            leads,
            channel,
            store,
            composer,
            classifier,
            settings,
            transient_failures: HashMap::new(),
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!(from = %self.phase, to = %phase, "Phase change");
        self.phase = phase;
    }

    /// Run cycles until `shutdown` fires. Errors and panics inside a cycle are
    /// logged and followed by the normal cooldown; nothing escapes this loop.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut cycle: u64 = 0;
        while !shutdown.is_cancelled() {
            cycle += 1;
            info!(cycle, "Starting outreach cycle");

            match AssertUnwindSafe(self.run_cycle(&shutdown))
                .catch_unwind()
                .await
            {
                Ok(Ok(stats)) => info!(cycle, "Cycle complete. {stats}"),
                Ok(Err(e)) => error!(cycle, error = %format!("{e:#}"), "Cycle failed"),
                Err(panic) => error!(cycle, panic = %panic_message(panic.as_ref()), "Cycle panicked"),
            }

            self.enter(CyclePhase::CycleCooldown);
            let wait = self.settings.cycle_delay.sample();
            info!(wait_secs = wait.as_secs(), "Sleeping before next cycle");
            if !sleep_or_shutdown(wait, &shutdown).await {
                break;
            }
            self.enter(CyclePhase::Idle);
        }
        self.enter(CyclePhase::Idle);
        info!(cycles = cycle, "Outreach stopped");
    }

    /// One cycle: load, filter, attempt up to the cap. Stops early (between
    /// attempts, never mid-send) when shutdown is requested.
    pub async fn run_cycle(&mut self, shutdown: &CancellationToken) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        self.enter(CyclePhase::LoadingLeads);
        let candidates = self.leads.candidates().await?;
        stats.candidates = candidates.len() as u64;
        if candidates.is_empty() {
            info!("No candidates this cycle");
            return Ok(stats);
        }

        self.enter(CyclePhase::Filtering);
        let selected = select_candidates(candidates, &self.store, &mut stats);
        info!(
            candidates = stats.candidates,
            eligible = selected.len(),
            already_known = stats.already_known,
            duplicate_in_cycle = stats.duplicate_in_cycle,
            "Candidates filtered"
        );

        for candidate in selected {
            if stats.attempted >= u64::from(self.settings.max_attempts) {
                info!(max_attempts = self.settings.max_attempts, "Cycle attempt cap reached");
                break;
            }
            if shutdown.is_cancelled() {
                break;
            }

            self.enter(CyclePhase::Attempting);
            stats.attempted += 1;
            self.attempt(&candidate, &mut stats).await;

            self.enter(CyclePhase::CoolingDown);
            let wait = self.settings.attempt_delay.sample();
            debug!(wait_secs = wait.as_secs(), "Pacing before next attempt");
            if !sleep_or_shutdown(wait, shutdown).await {
                break;
            }
        }

        Ok(stats)
    }

    async fn attempt(&mut self, candidate: &Candidate, stats: &mut CycleStats) {
        let key = candidate.key().clone();
        let handle = candidate.item.author.trim();
        let message = self.composer.compose(candidate);

        let sent = tokio::time::timeout(
            self.settings.send_timeout,
            self.channel.send(handle, &message.subject, &message.body),
        )
        .await;

        let delivery = match sent {
            Ok(Ok(())) => Delivery::Sent,
            Ok(Err(e)) => self.classifier.classify(&e),
            Err(_) => Delivery::Transient {
                reason: format!("send timed out after {}s", self.settings.send_timeout.as_secs()),
            },
        };

        match delivery {
            Delivery::Sent => {
                stats.contacted += 1;
                info!(
                    handle,
                    locator = %key.locator,
                    category = %candidate.lead.category,
                    signal = %candidate.lead.matched_signal,
                    "Contacted"
                );
                self.transient_failures.remove(&key);
                self.record(candidate, Outcome::Contacted, None);
            }
            Delivery::Permanent { code } => {
                stats.permanently_skipped += 1;
                info!(handle, locator = %key.locator, code = %code, "Permanent failure, recording");
                self.transient_failures.remove(&key);
                self.record(candidate, Outcome::PermanentlySkipped, Some(code));
            }
            Delivery::Transient { reason } => {
                stats.transient_failures += 1;
                // Failures are only counted while escalation is on.
                let Some(limit) = self.settings.escalate_after_transient else {
                    warn!(handle, reason = %reason, "Transient failure, will retry next cycle");
                    return;
                };
                let failures = self.transient_failures.entry(key.clone()).or_insert(0);
                *failures += 1;
                let failures = *failures;

                if failures >= limit {
                    stats.escalated += 1;
                    warn!(handle, failures, reason = %reason, "Transient failure limit reached, recording as error");
                    self.transient_failures.remove(&key);
                    self.record(candidate, Outcome::Error, Some(reason));
                } else {
                    warn!(handle, failures, reason = %reason, "Transient failure, will retry next cycle");
                }
            }
        }
    }

    /// Persist an outcome. A failed write is logged; the in-memory record
    /// already holds the identity, so this process will not retry it.
    fn record(&mut self, candidate: &Candidate, outcome: Outcome, reason: Option<String>) {
        let request = RecordRequest {
            key: candidate.key().clone(),
            display_handle: candidate.item.author.trim().to_string(),
            title: candidate.item.title.clone(),
            channel: candidate.item.channel.clone(),
            outcome,
            reason,
        };
        if let Err(e) = self.store.record(request) {
            error!(
                identity = %candidate.key(),
                outcome = %outcome,
                error = %format!("{e:#}"),
                "Failed to persist outcome"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadsignal_common::{ContentItem, Lead};
    use leadsignal_ledger::StorePaths;
    use leadsignal_scout::MessageTemplate;

    use super::*;
    use crate::channel::ChannelError;
    use crate::testing::{MockChannel, Reply, StaticLeadSource};

    fn candidate(handle: &str, locator: &str, priority: i64) -> Candidate {
        let item = ContentItem {
            locator: locator.into(),
            author: handle.into(),
            title: "t".into(),
            body: String::new(),
            created_at: Utc::now(),
            channel: "c".into(),
        };
        Candidate {
            lead: Lead {
                key: item.key(),
                category: "x".into(),
                matched_signal: "k=\"v\"".into(),
                signals: vec![],
                priority,
            },
            item,
        }
    }

    fn store(dir: &std::path::Path) -> RecordStore {
        RecordStore::open(StorePaths {
            snapshot: dir.join("s.json"),
            audit_log: None,
        })
    }

    #[test]
    fn selection_sorts_stably_and_dedups_within_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = CycleStats::default();
        let selected = select_candidates(
            vec![
                candidate("a", "u1", 1),
                candidate("b", "u2", 5),
                candidate("c", "u3", 1),
                candidate("B", "u4", 3),
                candidate("d", "u2", 0),
                candidate("", "u5", 9),
            ],
            &store(dir.path()),
            &mut stats,
        );

        let handles: Vec<&str> = selected.iter().map(|c| c.key().handle.as_str()).collect();
        assert_eq!(handles, vec!["b", "a", "c"]);
        assert_eq!(stats.duplicate_in_cycle, 2);
        assert_eq!(stats.incomplete, 1);
    }

    #[test]
    fn selection_drops_known_identities() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        store
            .record(RecordRequest {
                key: IdentityKey::new("known", "old-url"),
                display_handle: "known".into(),
                title: String::new(),
                channel: String::new(),
                outcome: Outcome::Contacted,
                reason: None,
            })
            .unwrap();

        let mut stats = CycleStats::default();
        let selected = select_candidates(
            vec![
                candidate("KNOWN", "new-url", 1),
                candidate("fresh", "old-url", 1),
                candidate("fresh2", "u9", 1),
            ],
            &store,
            &mut stats,
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(stats.already_known, 2);
    }

    fn tracking_outreach(channel: MockChannel, escalate_after: Option<u32>, dir: &std::path::Path) -> Outreach {
        Outreach::new(
            Arc::new(StaticLeadSource::new(vec![
                candidate("flaky", "u1", 2),
                candidate("down", "u2", 1),
            ])),
            Arc::new(channel),
            store(dir),
            MessageComposer::new(vec![MessageTemplate {
                subject: "s".into(),
                body: "b".into(),
            }])
            .unwrap(),
            FailureClassifier::new(["USER_DOESNT_EXIST"]),
            OutreachSettings {
                max_attempts: 10,
                attempt_delay: DelayWindow::zero(),
                cycle_delay: DelayWindow::zero(),
                send_timeout: Duration::from_secs(5),
                escalate_after_transient: escalate_after,
            },
        )
    }

    fn scripted_channel() -> MockChannel {
        MockChannel::new()
            .on_send_sequence("flaky", vec![Reply::Fail(ChannelError::uncoded("503")), Reply::Ok])
            .on_send("down", Reply::Fail(ChannelError::uncoded("503")))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_not_tracked_without_escalation() {
        let dir = tempfile::tempdir().unwrap();
        let mut outreach = tracking_outreach(scripted_channel(), None, dir.path());
        let shutdown = CancellationToken::new();

        for _ in 0..3 {
            outreach.run_cycle(&shutdown).await.unwrap();
        }
        assert!(outreach.transient_failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_forgets_earlier_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut outreach = tracking_outreach(scripted_channel(), Some(10), dir.path());
        let shutdown = CancellationToken::new();

        outreach.run_cycle(&shutdown).await.unwrap();
        assert_eq!(outreach.transient_failures.len(), 2);

        let stats = outreach.run_cycle(&shutdown).await.unwrap();
        assert_eq!(stats.contacted, 1);
        let tracked: Vec<&str> = outreach
            .transient_failures
            .keys()
            .map(|k| k.handle.as_str())
            .collect();
        assert_eq!(tracked, vec!["down"]);
        assert_eq!(outreach.transient_failures[&IdentityKey::new("down", "u2")], 2);
    }

    #[test]
    fn panic_payloads_render() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
