//! Cycle scheduler: alternate stitch and measure until work runs out.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::core::budget::cycle_quota;
use crate::io::tracker::has_open_work;
use crate::measure::{MeasureReport, measure};
use crate::session::Session;
use crate::stitch::{StitchReport, stitch};

/// Reason why [`run_cycles`] stopped. All of these are normal termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CycleStop {
    /// No ready and no in-progress tasks remain.
    NoWork,
    MaxCycles { max_cycles: u32 },
    /// The lifetime stitch budget is spent.
    BudgetExhausted { attempted: u32, total: u32 },
}

/// One stitch + measure round.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle: u32,
    pub stitch: StitchReport,
    pub measure: MeasureReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Cycles that ran to completion.
    pub cycles: u32,
    /// Tasks attempted, including any counted before the scheduler started.
    pub attempted: u32,
    pub closed: usize,
    pub created: usize,
    pub stop: CycleStop,
}

/// Run cycles until no work is left or a limit is hit.
///
/// `attempted` seeds the lifetime budget with tasks already attempted by the
/// caller. `on_cycle` is called after every completed cycle.
pub fn run_cycles<F: FnMut(&CycleSummary)>(
    session: &Session<'_>,
    attempted: u32,
    mut on_cycle: F,
) -> Result<CycleReport> {
    let limits = &session.config.cycle;
    let mut report = CycleReport {
        cycles: 0,
        attempted,
        closed: 0,
        created: 0,
        stop: CycleStop::NoWork,
    };

    loop {
        let cycle = report.cycles + 1;
        if limits.max_cycles > 0 && cycle > limits.max_cycles {
            report.stop = CycleStop::MaxCycles {
                max_cycles: limits.max_cycles,
            };
            break;
        }
        let Some(quota) = cycle_quota(
            limits.stitch_per_cycle,
            limits.stitch_total,
            report.attempted,
        ) else {
            report.stop = CycleStop::BudgetExhausted {
                attempted: report.attempted,
                total: limits.stitch_total,
            };
            break;
        };

        info!(cycle, quota, "starting cycle");
        let stitch_report = stitch(session, quota)?;
        report.attempted += stitch_report.attempted();
        report.closed += stitch_report.closed();

        let measure_report = measure(session, limits.measure_batch)?;
        report.created += measure_report.created.len();
        report.cycles = cycle;

        on_cycle(&CycleSummary {
            cycle,
            stitch: stitch_report,
            measure: measure_report,
        });

        if !has_open_work(session.tracker)? {
            report.stop = CycleStop::NoWork;
            break;
        }
    }

    info!(
        cycles = report.cycles,
        attempted = report.attempted,
        stop = ?report.stop,
        "cycles finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::{MemoryTracker, ScriptedAgent, TestRepo};

    #[test]
    fn empty_tracker_stops_after_one_cycle() {
        let repo = TestRepo::new().expect("repo");
        let tracker = MemoryTracker::new();
        let agent = ScriptedAgent::new();
        agent.push_plan("[]");
        let session = repo.session(&tracker, &agent);

        let report = run_cycles(&session, 0, |_| {}).expect("cycles");

        assert_eq!(report.cycles, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(report.stop, CycleStop::NoWork);
    }

    #[test]
    fn planned_tasks_are_stitched_in_the_next_cycle() {
        let repo = TestRepo::new().expect("repo");
        let tracker = MemoryTracker::new();
        let agent = ScriptedAgent::new();
        agent.push_plan(r#"[{"title":"add lib","description":"create src/lib.rs"}]"#);
        agent.push_success(&[("src/lib.rs", "pub fn answer() -> u32 { 42 }\n")]);
        agent.push_plan("[]");
        let session = repo.session(&tracker, &agent);

        let mut seen = Vec::new();
        let report = run_cycles(&session, 0, |summary| seen.push(summary.cycle)).expect("cycles");

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(report.created, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(report.stop, CycleStop::NoWork);
        assert_eq!(tracker.status("t-1"), Some(TaskStatus::Closed));
        assert!(repo.root().join("src/lib.rs").exists());
    }

    #[test]
    fn max_cycles_stops_a_run_that_keeps_failing() {
        let repo = TestRepo::new().expect("repo");
        let tracker = MemoryTracker::new();
        tracker.insert_task("g-1", "flaky", "task", TaskStatus::Open);
        let agent = ScriptedAgent::new();
        for _ in 0..2 {
            agent.push_failure(Some(1));
            agent.push_plan("[]");
        }
        let mut config = repo.config();
        config.cycle.max_cycles = 2;
        config.cycle.stitch_per_cycle = 1;
        config.cycle.stitch_total = 0;
        let session = repo.session_with(config, &tracker, &agent);

        let report = run_cycles(&session, 0, |_| {}).expect("cycles");

        assert_eq!(report.cycles, 2);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.stop, CycleStop::MaxCycles { max_cycles: 2 });
        assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
        assert_eq!(agent.remaining(), 0);
    }

    #[test]
    fn lifetime_budget_includes_prior_attempts() {
        let repo = TestRepo::new().expect("repo");
        let tracker = MemoryTracker::new();
        tracker.insert_task("g-1", "one", "task", TaskStatus::Open);
        tracker.insert_task("g-2", "two", "task", TaskStatus::Open);
        let agent = ScriptedAgent::new();
        agent.push_failure(Some(1));
        agent.push_plan("[]");
        let mut config = repo.config();
        config.cycle.stitch_per_cycle = 0;
        config.cycle.stitch_total = 3;
        let session = repo.session_with(config, &tracker, &agent);

        let report = run_cycles(&session, 2, |_| {}).expect("cycles");

        assert_eq!(report.cycles, 1);
        assert_eq!(
            report.stop,
            CycleStop::BudgetExhausted {
                attempted: 3,
                total: 3
            }
        );
        assert_eq!(agent.requests().len(), 2);
    }
}
