//! Reply completion detection.
//!
//! The surface never says "done", so completion is inferred from quiescence:
//! the sampled reply must stay byte-identical for a number of consecutive
//! polls. The detector is a plain state machine over `(phase, sample)`; the
//! driver owns the timer and performs every side effect.

use crate::model::StabilizationPolicy;
use crate::session::SessionState;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DetectorPhase {
    Submitted,
    Sampling,
    Stabilizing,
    Finalizing,
    Done,
    TimedOut,
}

impl DetectorPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, DetectorPhase::Done | DetectorPhase::TimedOut)
    }
}

/// What a single sample meant to the detector.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SampleVerdict {
    /// The sample call failed or nothing has been rendered yet.
    Missing,
    /// The surface is still showing the prompt itself.
    Echo,
    /// Implausibly shorter than the last observation; treated as DOM flicker.
    Shrunk,
    Changed,
    Unchanged,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    Continue(SampleVerdict),
    /// Text held steady long enough; take one authoritative re-sample.
    Finalize,
    /// Poll ceiling reached; flush whatever was last observed.
    TimedOut,
    /// The detector already left the polling phases.
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShrinkGuard {
    pub ratio: f64,
    pub slack_chars: usize,
    pub floor_chars: usize,
}

impl ShrinkGuard {
    pub fn from_policy(policy: &StabilizationPolicy) -> Self {
        Self {
            ratio: policy.shrink_ratio,
            slack_chars: policy.shrink_slack_chars,
            floor_chars: policy.shrink_floor_chars,
        }
    }

    /// True when `sample` should be ignored as a transient partial read of `last`.
    pub fn rejects(&self, last: &str, sample: &str) -> bool {
        if last.is_empty() {
            return false;
        }
        if sample.is_empty() {
            return true;
        }
        let last_len = last.chars().count();
        let len = sample.chars().count();
        let floor = (self.floor_chars as f64).max(last_len as f64 * self.ratio);
        len + self.slack_chars < last_len && (len as f64) < floor
    }
}

#[derive(Clone, Debug)]
pub struct CompletionDetector {
    phase: DetectorPhase,
    echo: String,
    unchanged_threshold: u32,
    max_poll_count: u32,
    shrink: ShrinkGuard,
}

impl CompletionDetector {
    pub fn new(prompt: &str, policy: &StabilizationPolicy) -> Self {
        Self {
            phase: DetectorPhase::Submitted,
            echo: prompt.trim().to_string(),
            unchanged_threshold: policy.unchanged_threshold.max(1),
            max_poll_count: policy.max_poll_count.max(1),
            shrink: ShrinkGuard::from_policy(policy),
        }
    }

    pub fn phase(&self) -> DetectorPhase {
        self.phase
    }

    fn is_echo(&self, text: &str) -> bool {
        !text.is_empty() && text == self.echo
    }

    fn classify(&self, session: &SessionState, sample: Option<&str>) -> SampleVerdict {
        let Some(text) = sample.map(str::trim) else {
            return SampleVerdict::Missing;
        };
        let last = session.last_observed_text.as_str();
        if text.is_empty() && last.is_empty() {
            return SampleVerdict::Missing;
        }
        if self.is_echo(text) {
            return SampleVerdict::Echo;
        }
        if self.shrink.rejects(last, text) {
            return SampleVerdict::Shrunk;
        }
        if text == last {
            SampleVerdict::Unchanged
        } else {
            SampleVerdict::Changed
        }
    }

    /// Feeds one poll tick. `None` means the sample could not be taken.
    pub fn observe(&mut self, session: &mut SessionState, sample: Option<&str>) -> Step {
        match self.phase {
            DetectorPhase::Submitted | DetectorPhase::Sampling | DetectorPhase::Stabilizing => {}
            DetectorPhase::Finalizing => return Step::Finalize,
            DetectorPhase::Done | DetectorPhase::TimedOut => return Step::Finished,
        }

        session.total_poll_count = session.total_poll_count.saturating_add(1);
        let verdict = self.classify(session, sample);
        match verdict {
            SampleVerdict::Changed => {
                session.last_observed_text = sample.map(str::trim).unwrap_or_default().to_string();
                session.unchanged_poll_count = 0;
                self.phase = DetectorPhase::Sampling;
            }
            SampleVerdict::Unchanged => {
                session.unchanged_poll_count += 1;
                self.phase = DetectorPhase::Stabilizing;
                if session.unchanged_poll_count >= self.unchanged_threshold {
                    self.phase = DetectorPhase::Finalizing;
                    return Step::Finalize;
                }
            }
            SampleVerdict::Missing | SampleVerdict::Echo | SampleVerdict::Shrunk => {}
        }

        if session.total_poll_count >= self.max_poll_count {
            self.phase = DetectorPhase::TimedOut;
            return Step::TimedOut;
        }
        Step::Continue(verdict)
    }

    /// Resolves the turn from the authoritative re-sample, falling back to the
    /// last observation when the re-sample is empty, an echo, or a flicker.
    pub fn finalize(&mut self, session: &SessionState, resample: Option<&str>) -> String {
        self.phase = DetectorPhase::Done;
        let last = session.last_observed_text.as_str();
        match resample.map(str::trim) {
            Some(text) if !text.is_empty() && !self.is_echo(text) && !self.shrink.rejects(last, text) => {
                text.to_string()
            }
            _ => last.to_string(),
        }
    }

    /// Marks the turn finished without a re-sample (safety-net path).
    pub fn force_done(&mut self) {
        self.phase = DetectorPhase::Done;
    }
}
