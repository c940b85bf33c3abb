use std::time::Duration;

use tokio::time::Instant;

use crate::config::{AfterStages, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    /// 0-based index of the current stage.
    Ramping(usize),
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Maps elapsed run time to a desired number of virtual users.
#[derive(Debug, Clone)]
pub struct StageScheduler {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
    after: AfterStages,
    started_at: Option<Instant>,
}

impl StageScheduler {
    pub fn new(start: u64, stages: Vec<Stage>, after: AfterStages) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
            after,
            started_at: None,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
    }

    pub fn state(&self, now: Instant) -> SchedulerState {
        match self.started_at {
            None => SchedulerState::NotStarted,
            Some(t0) => self.state_at(now.saturating_duration_since(t0)),
        }
    }

    /// Desired concurrency at `now`; the start VUs before [`Self::start`].
    pub fn target(&self, now: Instant) -> u64 {
        match self.started_at {
            None => self.start,
            Some(t0) => self.target_at(now.saturating_duration_since(t0)),
        }
    }

    pub fn state_at(&self, elapsed: Duration) -> SchedulerState {
        match self.stage_index(elapsed) {
            Some(i) => SchedulerState::Ramping(i),
            None => SchedulerState::Completed,
        }
    }

    /// Index of the stage covering `elapsed`. An instant on a boundary belongs
    /// to the stage that ends there.
    fn stage_index(&self, elapsed: Duration) -> Option<usize> {
        if self.stages.is_empty() || elapsed > self.total_duration() {
            return None;
        }
        let idx = match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) => i,
            Err(i) => i,
        };
        Some(idx)
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        (
            stage_start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(idx) = self.stage_index(elapsed) else {
            return match self.after {
                AfterStages::Stop => 0,
                AfterStages::Hold => self.stages.last().map_or(self.start, |s| s.target),
            };
        };

        let (stage_start, stage_end, start_target, end_target) = self.stage_bounds(idx);
        let den = stage_end.saturating_sub(stage_start).as_nanos() as i128;
        if den == 0 {
            return end_target;
        }
        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;

        // start + (end - start) * num / den, rounded to nearest with ties up.
        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;
        let scaled = start_i * den + delta * num;
        let rounded = (2 * scaled + den).div_euclid(2 * den);
        rounded.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);
        let idx = self.stage_index(clamped)?;
        let (stage_start, stage_end, start_target, end_target) = self.stage_bounds(idx);

        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.target_at(clamped),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn secs(v: u64) -> Duration {
        Duration::from_secs(v)
    }

    #[test]
    fn interpolates_linearly_within_a_stage() {
        let s = StageScheduler::new(0, vec![Stage::new(secs(10), 10)], AfterStages::Stop);
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(1)), 1);
        assert_eq!(s.target_at(secs(5)), 5);
        assert_eq!(s.target_at(ms(490)), 0);
        // 0.5 rounds up.
        assert_eq!(s.target_at(ms(500)), 1);
        assert_eq!(s.target_at(secs(10)), 10);
    }

    #[test]
    fn ramp_down_rounds_half_up() {
        let s = StageScheduler::new(10, vec![Stage::new(secs(10), 0)], AfterStages::Stop);
        // 7.5 -> 8
        assert_eq!(s.target_at(ms(2500)), 8);
        // 7.4 -> 7
        assert_eq!(s.target_at(ms(2600)), 7);
        assert_eq!(s.target_at(secs(10)), 0);
    }

    #[test]
    fn second_stage_ramps_from_previous_target() {
        let s = StageScheduler::new(
            0,
            vec![Stage::new(secs(10), 10), Stage::new(secs(10), 20)],
            AfterStages::Stop,
        );
        assert_eq!(s.target_at(secs(15)), 15);
        assert_eq!(s.state_at(secs(15)), SchedulerState::Ramping(1));
    }

    #[test]
    fn after_stages_policy_decides_the_tail() {
        let stages = vec![Stage::new(secs(2), 4)];
        let stop = StageScheduler::new(0, stages.clone(), AfterStages::Stop);
        let hold = StageScheduler::new(0, stages, AfterStages::Hold);

        assert_eq!(stop.target_at(secs(2)), 4);
        assert_eq!(stop.target_at(secs(2) + ms(1)), 0);
        assert_eq!(hold.target_at(secs(60)), 4);
        assert_eq!(stop.state_at(secs(3)), SchedulerState::Completed);
        assert_eq!(hold.state_at(secs(3)), SchedulerState::Completed);
    }

    #[test]
    fn boundary_instants_return_the_stage_target_exactly() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let start = rng.gen_range(0..50);
            let n = rng.gen_range(1..8);
            let stages: Vec<Stage> = (0..n)
                .map(|_| Stage::new(ms(rng.gen_range(1..120_000)), rng.gen_range(0..500)))
                .collect();
            let s = StageScheduler::new(start, stages.clone(), AfterStages::Stop);

            let mut t = Duration::ZERO;
            for (i, stage) in stages.iter().enumerate() {
                t += stage.duration;
                assert_eq!(
                    s.target_at(t),
                    stage.target,
                    "stage {i} of {stages:?} (start {start})"
                );
                assert_eq!(s.state_at(t), SchedulerState::Ramping(i));
            }
        }
    }

    #[test]
    fn targets_stay_between_stage_endpoints() {
        let s = StageScheduler::new(
            3,
            vec![Stage::new(secs(7), 11), Stage::new(secs(3), 2)],
            AfterStages::Stop,
        );
        for step in 0..=100u64 {
            let t = ms(step * 100);
            let v = s.target_at(t);
            if t <= secs(7) {
                assert!((3..=11).contains(&v), "t={t:?} v={v}");
            } else {
                assert!((2..=11).contains(&v), "t={t:?} v={v}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn state_machine_walks_through_stages() {
        let mut s = StageScheduler::new(
            0,
            vec![Stage::new(secs(1), 2), Stage::new(secs(1), 0)],
            AfterStages::Stop,
        );
        let t0 = Instant::now();
        assert_eq!(s.state(t0), SchedulerState::NotStarted);

        s.start(t0);
        assert_eq!(s.state(t0), SchedulerState::Ramping(0));
        tokio::time::advance(ms(1500)).await;
        assert_eq!(s.state(Instant::now()), SchedulerState::Ramping(1));
        assert_eq!(s.target(Instant::now()), 1);
        tokio::time::advance(secs(1)).await;
        assert_eq!(s.state(Instant::now()), SchedulerState::Completed);
        assert_eq!(s.target(Instant::now()), 0);
    }

    #[test]
    fn stage_snapshot_reports_position() {
        let s = StageScheduler::new(
            0,
            vec![Stage::new(secs(10), 10), Stage::new(secs(10), 10)],
            AfterStages::Stop,
        );
        let snap = s
            .stage_snapshot_at(secs(12))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.stage_elapsed, secs(2));
        assert_eq!(snap.stage_remaining, secs(8));
        assert_eq!(snap.current_target, 10);

        let end = s
            .stage_snapshot_at(secs(99))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(end.index, 1);
        assert_eq!(end.stage_remaining, Duration::ZERO);
    }
}
