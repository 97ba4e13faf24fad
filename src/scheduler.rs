/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! Frame pacing (C10): tracks how many CPU cycles a frame-length tick should
//! run for, adaptively nudging that figure to keep the realized clock close
//! to `target_clock_hz` over time. The scheduler itself doesn't drive a
//! wall-clock timer; [`crate::Machine::run_frame`] is called once per host
//! tick and reports the cycles it actually ran so the estimate can adjust.
use std::time::{Duration, Instant};

const ADJUST_STEP: i64 = 30;
const ADJUST_THRESHOLD: i64 = 2000;
const MAX_CYCLES_PER_FRAME: u64 = 1_500_000;
const MEASURE_WINDOW: Duration = Duration::from_secs(1);

pub struct Scheduler {
    target_clock_hz: u32,
    fps: u32,
    cycles_per_frame: u64,
    measured_cycles: u64,
    window_start: Instant,
}

impl Scheduler {
    pub fn new(target_clock_hz: u32, fps: u32) -> Self {
        let cycles_per_frame = (target_clock_hz as u64 / fps.max(1) as u64).max(1);
        Scheduler {
            target_clock_hz,
            fps,
            cycles_per_frame,
            measured_cycles: 0,
            window_start: Instant::now(),
        }
    }

    pub fn set_target_clock(&mut self, hz: u32) {
        self.target_clock_hz = hz;
        self.cycles_per_frame = (hz as u64 / self.fps.max(1) as u64).max(1);
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps;
        self.cycles_per_frame = (self.target_clock_hz as u64 / fps.max(1) as u64).max(1);
    }

    pub fn cycles_per_frame(&self) -> u64 {
        self.cycles_per_frame
    }

    /// Folds one frame's realized cycle count into the running measurement
    /// and, once a second has elapsed, nudges `cycles_per_frame` toward the
    /// target clock rate.
    pub fn record_frame(&mut self, ran_cycles: u64) {
        self.measured_cycles += ran_cycles;
        if self.window_start.elapsed() < MEASURE_WINDOW {
            return;
        }
        let expected = self.target_clock_hz as i64;
        let error = self.measured_cycles as i64 - expected;
        if error.abs() > ADJUST_THRESHOLD {
            let delta = if error > 0 { -ADJUST_STEP } else { ADJUST_STEP };
            let adjusted = (self.cycles_per_frame as i64 + delta).max(1) as u64;
            self.cycles_per_frame = adjusted.min(MAX_CYCLES_PER_FRAME);
        }
        self.measured_cycles = 0;
        self.window_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_budget_divides_target_by_fps() {
        let s = Scheduler::new(3_000_000, 20);
        assert_eq!(s.cycles_per_frame(), 150_000);
    }

    #[test]
    fn changing_fps_rescales_the_budget() {
        let mut s = Scheduler::new(3_000_000, 20);
        s.set_fps(60);
        assert_eq!(s.cycles_per_frame(), 50_000);
    }

    #[test]
    fn record_frame_accumulates_until_the_window_elapses() {
        let mut s = Scheduler::new(3_000_000, 20);
        let before = s.cycles_per_frame();
        s.record_frame(150_000);
        // the 1-second measurement window hasn't elapsed yet in a unit test.
        assert_eq!(s.cycles_per_frame(), before);
    }
}
