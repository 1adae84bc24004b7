//! Processing state machine.
//!
//! `Fetching -> Probing -> {Thumbnailing, Storyboarding, DurationProbing}
//! -> Transcoding -> Publishing -> Recording -> Done`, with `Aborted`
//! reachable from any non-terminal state. The three derivation states run
//! side by side; they are reported as branches and never become the spine
//! state.

use std::time::Instant;

use vpipe_models::{JobId, VideoId};

use crate::logging::{Outcome, PipelineEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Fetching,
    Probing,
    Thumbnailing,
    Storyboarding,
    DurationProbing,
    Transcoding,
    Publishing,
    Recording,
    Done,
    Aborted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Fetching => "fetching",
            PipelineState::Probing => "probing",
            PipelineState::Thumbnailing => "thumbnailing",
            PipelineState::Storyboarding => "storyboarding",
            PipelineState::DurationProbing => "duration_probing",
            PipelineState::Transcoding => "transcoding",
            PipelineState::Publishing => "publishing",
            PipelineState::Recording => "recording",
            PipelineState::Done => "done",
            PipelineState::Aborted => "aborted",
        }
    }

    /// Component the state belongs to, as reported in events.
    pub fn component(&self) -> &'static str {
        match self {
            PipelineState::Fetching | PipelineState::Publishing => "object_store",
            PipelineState::Probing | PipelineState::DurationProbing => "media_prober",
            PipelineState::Thumbnailing => "thumbnail_renderer",
            PipelineState::Storyboarding => "storyboard_builder",
            PipelineState::Transcoding => "transcode_executor",
            PipelineState::Recording => "record_writer",
            PipelineState::Done | PipelineState::Aborted => "orchestrator",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PipelineState::Fetching => 0,
            PipelineState::Probing => 1,
            PipelineState::Thumbnailing
            | PipelineState::Storyboarding
            | PipelineState::DurationProbing => 2,
            PipelineState::Transcoding => 3,
            PipelineState::Publishing => 4,
            PipelineState::Recording => 5,
            PipelineState::Done | PipelineState::Aborted => 6,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.rank() == 2
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Aborted)
    }

    /// Spine moves forward only; skipped states are allowed.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        if self.is_terminal() || next.is_branch() {
            return false;
        }
        next == PipelineState::Aborted || next.rank() > self.rank()
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Spine state of one attempt plus the events it emitted.
#[derive(Debug)]
pub struct StateTracker {
    job_id: JobId,
    video_id: VideoId,
    current: PipelineState,
    entered_at: Instant,
    events: Vec<PipelineEvent>,
}

impl StateTracker {
    pub fn new(job_id: JobId, video_id: VideoId) -> Self {
        Self {
            job_id,
            video_id,
            current: PipelineState::Fetching,
            entered_at: Instant::now(),
            events: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Close the current state with `outcome` and enter `next`.
    ///
    /// Returns false (and changes nothing) for a transition the machine
    /// does not allow.
    pub fn advance(&mut self, next: PipelineState, outcome: Outcome) -> bool {
        if !self.current.can_advance_to(next) {
            return false;
        }

        self.record(self.current, self.entered_at, outcome);
        self.current = next;
        self.entered_at = Instant::now();

        if next.is_terminal() {
            let terminal_outcome = if next == PipelineState::Aborted {
                Outcome::Aborted
            } else {
                Outcome::Succeeded
            };
            self.record(next, self.entered_at, terminal_outcome);
        }
        true
    }

    /// Abort from wherever the attempt is.
    pub fn abort(&mut self) {
        self.advance(PipelineState::Aborted, Outcome::Aborted);
    }

    /// Report a derivation branch that started at `started`.
    pub fn branch(&mut self, state: PipelineState, started: Instant, outcome: Outcome) {
        if state.is_branch() {
            self.record(state, started, outcome);
        }
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    fn record(&mut self, state: PipelineState, since: Instant, outcome: Outcome) {
        let event = PipelineEvent {
            component: state.component(),
            state: state.as_str(),
            job_id: self.job_id.to_string(),
            video_id: self.video_id.to_string(),
            duration: since.elapsed(),
            outcome,
        };
        event.emit();
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StateTracker {
        StateTracker::new(JobId::from_string("j1"), VideoId::from("v1"))
    }

    #[test]
    fn test_forward_only() {
        assert!(PipelineState::Fetching.can_advance_to(PipelineState::Probing));
        assert!(PipelineState::Probing.can_advance_to(PipelineState::Transcoding));
        assert!(!PipelineState::Transcoding.can_advance_to(PipelineState::Probing));
        assert!(!PipelineState::Probing.can_advance_to(PipelineState::Thumbnailing));
        assert!(!PipelineState::Done.can_advance_to(PipelineState::Aborted));
    }

    #[test]
    fn test_abort_from_anywhere() {
        for state in [
            PipelineState::Fetching,
            PipelineState::Transcoding,
            PipelineState::Recording,
        ] {
            assert!(state.can_advance_to(PipelineState::Aborted));
        }
    }

    #[test]
    fn test_events_per_transition() {
        let mut t = tracker();
        assert!(t.advance(PipelineState::Probing, Outcome::Succeeded));
        t.branch(PipelineState::Storyboarding, Instant::now(), Outcome::Failed);
        t.branch(PipelineState::Recording, Instant::now(), Outcome::Failed);
        assert!(t.advance(PipelineState::Transcoding, Outcome::Succeeded));
        t.abort();

        let states: Vec<_> = t.events().iter().map(|e| (e.state, e.outcome)).collect();
        assert_eq!(
            states,
            vec![
                ("fetching", Outcome::Succeeded),
                ("storyboarding", Outcome::Failed),
                ("probing", Outcome::Succeeded),
                ("transcoding", Outcome::Aborted),
                ("aborted", Outcome::Aborted),
            ]
        );
        assert_eq!(t.current(), PipelineState::Aborted);
        assert!(!t.advance(PipelineState::Done, Outcome::Succeeded));
    }
}
