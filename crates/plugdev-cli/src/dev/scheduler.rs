//! Rebuild scheduling.
//!
//! [`ChangeScheduler`] is a plain state machine: it is fed events together
//! with the current time and answers with a single timer deadline. The
//! engine sleeps until [`ChangeScheduler::next_wake`], calls
//! [`ChangeScheduler::on_timer`], and runs whatever batch comes out. No I/O
//! happens here, which keeps every timing rule testable with a fake clock.
//!
//! ```text
//!            change                    timer (not building)
//!   Idle ───────────────► Accumulating ───────────────────► Building
//!    ▲                    / Debouncing                        │  ▲
//!    │                                                change  │  │ timer: re-arm
//!    │        finished, nothing pending                       ▼  │ after retry delay
//!    └────────────────────────────────────────────────── PendingRetry
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DevMode;

/// Re-arm delay when the timer fires during a lazy-mode build.
pub const LAZY_RETRY_DELAY: Duration = Duration::from_millis(250);
/// Re-arm delay when the timer fires during an instant-mode build.
pub const INSTANT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Timing rules for one dev session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub mode: DevMode,
    /// Lazy mode: how long the sources must stay untouched
    pub quiet_window: Duration,
    /// Instant mode: how long to wait for the rest of a save burst
    pub coalesce_delay: Duration,
    /// Timer re-arm delay while a build is in flight
    pub retry_delay: Duration,
}

impl SchedulePolicy {
    pub fn new(mode: DevMode, quiet_window: Duration, coalesce_delay: Duration) -> Self {
        let retry_delay = match mode {
            DevMode::Lazy => LAZY_RETRY_DELAY,
            DevMode::Instant => INSTANT_RETRY_DELAY,
        };
        Self {
            mode,
            quiet_window,
            coalesce_delay,
            retry_delay,
        }
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    /// Changes are pending and a short timer is running
    Accumulating,
    /// Lazy mode: waiting for the quiet deadline
    Debouncing,
    Building,
    /// Building, with more changes queued for the next build
    PendingRetry,
}

/// Work handed to one rebuild. Taken atomically when the build starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Graph keys of changed source files
    pub files: BTreeSet<String>,
    pub manifest_changed: bool,
    /// Set by a manual trigger
    pub forced: bool,
}

impl ChangeBatch {
    /// Whether the batch asks for every entry regardless of the graph.
    pub fn requires_full_rebuild(&self) -> bool {
        self.manifest_changed || self.forced
    }
}

#[derive(Debug, Default)]
struct PendingChanges {
    files: BTreeSet<String>,
    manifest_changed: bool,
    forced: bool,
    quiet_deadline: Option<Instant>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.files.is_empty() && !self.manifest_changed && !self.forced
    }

    fn is_urgent(&self) -> bool {
        self.manifest_changed || self.forced
    }
}

#[derive(Debug)]
pub struct ChangeScheduler {
    policy: SchedulePolicy,
    pending: PendingChanges,
    timer: Option<Instant>,
    building: bool,
}

impl ChangeScheduler {
    pub fn new(policy: SchedulePolicy) -> Self {
        Self {
            policy,
            pending: PendingChanges::default(),
            timer: None,
            building: false,
        }
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    /// A source file was added, changed or removed.
    pub fn on_source_change(&mut self, file: impl Into<String>, now: Instant) {
        self.pending.files.insert(file.into());
        if self.pending.is_urgent() {
            // An immediate build is already due; the file rides along.
            return;
        }
        match self.policy.mode {
            DevMode::Instant => {
                self.timer = Some(now + self.policy.coalesce_delay);
            }
            DevMode::Lazy => {
                let deadline = now + self.policy.quiet_window;
                self.pending.quiet_deadline = Some(deadline);
                self.timer = Some(deadline);
            }
        }
    }

    /// The manifest file changed: rebuild everything, now.
    pub fn on_manifest_change(&mut self, now: Instant) {
        self.pending.manifest_changed = true;
        self.force(now);
    }

    /// The operator asked for a rebuild.
    pub fn on_manual_trigger(&mut self, now: Instant) {
        self.pending.forced = true;
        self.force(now);
    }

    fn force(&mut self, now: Instant) {
        self.pending.quiet_deadline = None;
        // A running build is never interrupted; the forced one starts when
        // it finishes.
        self.timer = if self.building { None } else { Some(now) };
    }

    /// The timer deadline passed. Returns the batch to build, if one is due.
    pub fn on_timer(&mut self, now: Instant) -> Option<ChangeBatch> {
        match self.timer {
            Some(at) if at <= now => self.timer = None,
            _ => return None,
        }
        if self.pending.is_empty() {
            return None;
        }
        if self.building {
            self.timer = Some(now + self.policy.retry_delay);
            return None;
        }
        if let Some(deadline) = self.pending.quiet_deadline {
            if deadline > now {
                self.timer = Some(deadline);
                return None;
            }
        }

        let pending = std::mem::take(&mut self.pending);
        self.building = true;
        Some(ChangeBatch {
            files: pending.files,
            manifest_changed: pending.manifest_changed,
            forced: pending.forced,
        })
    }

    /// The in-flight build ended, successfully or not.
    pub fn on_build_finished(&mut self, now: Instant) {
        self.building = false;
        if self.pending.is_empty() {
            self.timer = None;
            return;
        }
        if self.pending.is_urgent() {
            self.timer = Some(now);
            return;
        }
        match self.policy.mode {
            DevMode::Lazy => {
                self.timer = Some(self.pending.quiet_deadline.unwrap_or(now));
            }
            DevMode::Instant => {
                // The burst may still be going on; give it the usual delay.
                self.timer = Some(now + self.policy.coalesce_delay);
            }
        }
    }

    /// Hand back a batch that never reached the worker. Its files re-enter
    /// the pending set with the normal mode timing and a manual trigger
    /// stays forced. The manifest flag is not restored.
    pub fn requeue(&mut self, batch: ChangeBatch, now: Instant) {
        for file in batch.files {
            self.on_source_change(file, now);
        }
        if batch.forced {
            self.on_manual_trigger(now);
        }
    }

    /// When the engine should next call [`Self::on_timer`].
    pub fn next_wake(&self) -> Option<Instant> {
        self.timer
    }

    /// Remaining quiet time in lazy mode.
    pub fn quiet_deadline(&self) -> Option<Instant> {
        self.pending.quiet_deadline
    }

    pub fn is_building(&self) -> bool {
        self.building
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn phase(&self) -> SchedulerPhase {
        match (self.building, self.pending.is_empty()) {
            (true, true) => SchedulerPhase::Building,
            (true, false) => SchedulerPhase::PendingRetry,
            (false, true) => SchedulerPhase::Idle,
            (false, false) if self.pending.quiet_deadline.is_some() => SchedulerPhase::Debouncing,
            (false, false) => SchedulerPhase::Accumulating,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn lazy(window_ms: u32) -> ChangeScheduler {
        ChangeScheduler::new(SchedulePolicy::new(
            DevMode::Lazy,
            window_ms * MS,
            200 * MS,
        ))
    }

    fn instant() -> ChangeScheduler {
        ChangeScheduler::new(SchedulePolicy::new(
            DevMode::Instant,
            60_000 * MS,
            200 * MS,
        ))
    }

    #[test]
    fn test_lazy_deadline_follows_last_change() {
        let t0 = Instant::now();
        let mut s = lazy(1000);

        s.on_source_change("a.js", t0);
        s.on_source_change("a.js", t0 + 10 * MS);
        s.on_source_change("a.js", t0 + 20 * MS);

        assert_eq!(s.phase(), SchedulerPhase::Debouncing);
        assert_eq!(s.next_wake(), Some(t0 + 1020 * MS));
        assert_eq!(s.on_timer(t0 + 1000 * MS), None);

        let batch = s.on_timer(t0 + 1020 * MS).unwrap();
        assert_eq!(batch.files, BTreeSet::from(["a.js".to_string()]));
        assert!(!batch.requires_full_rebuild());
        assert_eq!(s.phase(), SchedulerPhase::Building);
    }

    #[test]
    fn test_instant_coalesces_burst() {
        let t0 = Instant::now();
        let mut s = instant();

        s.on_source_change("a.js", t0);
        s.on_source_change("b.js", t0 + 50 * MS);
        assert_eq!(s.phase(), SchedulerPhase::Accumulating);
        assert_eq!(s.next_wake(), Some(t0 + 250 * MS));

        let batch = s.on_timer(t0 + 250 * MS).unwrap();
        assert_eq!(batch.files.len(), 2);
        assert_eq!(s.on_timer(t0 + 500 * MS), None);
    }

    #[test]
    fn test_manifest_change_bypasses_debounce() {
        let t0 = Instant::now();
        let mut s = lazy(60_000);

        s.on_source_change("a.js", t0);
        s.on_manifest_change(t0 + 5 * MS);
        assert_eq!(s.next_wake(), Some(t0 + 5 * MS));
        assert_eq!(s.phase(), SchedulerPhase::Accumulating);

        // Later edits do not push an urgent build back out.
        s.on_source_change("b.js", t0 + 6 * MS);
        assert_eq!(s.next_wake(), Some(t0 + 5 * MS));

        let batch = s.on_timer(t0 + 6 * MS).unwrap();
        assert!(batch.manifest_changed);
        assert!(batch.requires_full_rebuild());
        assert_eq!(batch.files.len(), 2);
    }

    #[test]
    fn test_manual_trigger_with_nothing_changed() {
        let t0 = Instant::now();
        let mut s = lazy(60_000);

        s.on_manual_trigger(t0);
        let batch = s.on_timer(t0).unwrap();
        assert!(batch.forced);
        assert!(batch.files.is_empty());
    }

    #[test]
    fn test_timer_during_build_rearms_with_retry_delay() {
        let t0 = Instant::now();
        let mut s = instant();

        s.on_source_change("a.js", t0);
        s.on_timer(t0 + 200 * MS).unwrap();

        s.on_source_change("b.js", t0 + 300 * MS);
        assert_eq!(s.phase(), SchedulerPhase::PendingRetry);
        assert_eq!(s.on_timer(t0 + 500 * MS), None);
        assert_eq!(s.next_wake(), Some(t0 + 550 * MS));
        assert_eq!(s.on_timer(t0 + 550 * MS), None);
        assert_eq!(s.next_wake(), Some(t0 + 600 * MS));

        s.on_build_finished(t0 + 580 * MS);
        assert_eq!(s.next_wake(), Some(t0 + 780 * MS));
        assert_eq!(s.on_timer(t0 + 600 * MS), None);
        let batch = s.on_timer(t0 + 780 * MS).unwrap();
        assert_eq!(batch.files, BTreeSet::from(["b.js".to_string()]));
    }

    #[test]
    fn test_instant_burst_straddling_build_end_is_one_batch() {
        let t0 = Instant::now();
        let mut s = instant();

        s.on_source_change("a.js", t0);
        s.on_timer(t0 + 200 * MS).unwrap();
        s.on_source_change("b.js", t0 + 250 * MS);
        assert_eq!(s.on_timer(t0 + 450 * MS), None);
        s.on_build_finished(t0 + 480 * MS);
        assert_eq!(s.next_wake(), Some(t0 + 680 * MS));
        s.on_source_change("c.js", t0 + 520 * MS);

        assert_eq!(s.on_timer(t0 + 500 * MS), None);
        let batch = s.on_timer(t0 + 720 * MS).unwrap();
        assert_eq!(
            batch.files,
            BTreeSet::from(["b.js".to_string(), "c.js".to_string()])
        );
    }

    #[test]
    fn test_requeue_restores_files_with_mode_timing() {
        let t0 = Instant::now();
        let mut s = lazy(1000);

        s.on_source_change("util.js", t0);
        s.on_manifest_change(t0 + 100 * MS);
        let batch = s.on_timer(t0 + 100 * MS).unwrap();
        assert!(batch.manifest_changed);

        s.on_build_finished(t0 + 100 * MS);
        s.requeue(batch, t0 + 100 * MS);

        assert_eq!(s.phase(), SchedulerPhase::Debouncing);
        assert_eq!(s.next_wake(), Some(t0 + 1100 * MS));
        let retry = s.on_timer(t0 + 1100 * MS).unwrap();
        assert_eq!(retry.files, BTreeSet::from(["util.js".to_string()]));
        assert!(!retry.manifest_changed);
    }

    #[test]
    fn test_requeue_keeps_manual_trigger() {
        let t0 = Instant::now();
        let mut s = instant();

        s.on_manual_trigger(t0);
        let batch = s.on_timer(t0).unwrap();
        s.on_build_finished(t0);
        s.requeue(batch, t0);

        assert!(s.on_timer(t0).unwrap().forced);
    }

    #[test]
    fn test_change_during_build_is_never_lost() {
        let t0 = Instant::now();
        let mut s = lazy(1000);

        s.on_source_change("a.js", t0);
        s.on_timer(t0 + 1000 * MS).unwrap();
        s.on_source_change("b.js", t0 + 1100 * MS);

        // Build outlasts the quiet window of the second change.
        s.on_build_finished(t0 + 3000 * MS);
        assert_eq!(s.next_wake(), Some(t0 + 2100 * MS));

        let batch = s.on_timer(t0 + 3000 * MS).unwrap();
        assert_eq!(batch.files, BTreeSet::from(["b.js".to_string()]));

        s.on_build_finished(t0 + 3500 * MS);
        assert_eq!(s.phase(), SchedulerPhase::Idle);
        assert_eq!(s.next_wake(), None);
    }

    #[test]
    fn test_lazy_deadline_survives_build() {
        let t0 = Instant::now();
        let mut s = lazy(1000);

        s.on_source_change("a.js", t0);
        s.on_timer(t0 + 1000 * MS).unwrap();
        s.on_source_change("b.js", t0 + 1100 * MS);
        s.on_build_finished(t0 + 1200 * MS);

        assert_eq!(s.phase(), SchedulerPhase::Debouncing);
        assert_eq!(s.on_timer(t0 + 1200 * MS), None);
        assert!(s.on_timer(t0 + 2100 * MS).is_some());
    }

    #[test]
    fn test_manual_trigger_while_building_waits_for_build() {
        let t0 = Instant::now();
        let mut s = instant();

        s.on_source_change("a.js", t0);
        s.on_timer(t0 + 200 * MS).unwrap();
        s.on_source_change("b.js", t0 + 250 * MS);
        s.on_manual_trigger(t0 + 260 * MS);

        assert_eq!(s.next_wake(), None);
        assert!(s.is_building());

        s.on_build_finished(t0 + 900 * MS);
        assert_eq!(s.next_wake(), Some(t0 + 900 * MS));
        let batch = s.on_timer(t0 + 900 * MS).unwrap();
        assert!(batch.forced);
        assert_eq!(batch.files, BTreeSet::from(["b.js".to_string()]));
    }

    #[test]
    fn test_finished_build_with_nothing_pending_goes_idle() {
        let t0 = Instant::now();
        let mut s = instant();

        s.on_source_change("a.js", t0);
        s.on_timer(t0 + 200 * MS).unwrap();
        s.on_build_finished(t0 + 400 * MS);

        assert_eq!(s.phase(), SchedulerPhase::Idle);
        assert!(!s.has_pending());
        assert_eq!(s.on_timer(t0 + 10_000 * MS), None);
    }

    #[test]
    fn test_retry_delay_by_mode() {
        assert_eq!(lazy(1).policy().retry_delay, LAZY_RETRY_DELAY);
        assert_eq!(instant().policy().retry_delay, INSTANT_RETRY_DELAY);
    }
}
