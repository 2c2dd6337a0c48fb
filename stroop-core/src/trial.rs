use serde::{Deserialize, Serialize};

use crate::stimulus::{ContrastMode, StimulusItem};

/// Trial runner states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Idle,
    Fixation,
    StimulusOnset,
    AwaitingResponse,
    Feedback,
    Iti,
    RunComplete,
}

/// What the feedback screen tells the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackKind {
    Correct,
    Incorrect,
    NoResponse,
}

impl FeedbackKind {
    pub fn for_response(correct: Option<bool>) -> Self {
        match correct {
            Some(true) => FeedbackKind::Correct,
            Some(false) => FeedbackKind::Incorrect,
            None => FeedbackKind::NoResponse,
        }
    }
}

/// A fully resolved trial, ready to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialSpec {
    /// Ordinal position within the run, from 0.
    pub index: usize,
    pub block_index: usize,
    pub stimulus: StimulusItem,
    pub iti_ms: f64,
    pub feedback_enabled: bool,
    pub contrast_mode: ContrastMode,
}

/// Outcome of one completed trial. Built once by the runner, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialResult {
    spec: TrialSpec,
    onset_ns: u64,
    response_key: Option<char>,
    response_ns: Option<u64>,
    reaction_time_ms: Option<f64>,
    correct: Option<bool>,
    timed_out: bool,
}

impl TrialResult {
    pub fn responded(spec: TrialSpec, onset_ns: u64, key: char, response_ns: u64) -> Self {
        let rt_ns = response_ns.saturating_sub(onset_ns);
        let correct = key.eq_ignore_ascii_case(&spec.stimulus.correct_key());
        Self {
            spec,
            onset_ns,
            response_key: Some(key),
            response_ns: Some(response_ns),
            reaction_time_ms: Some(rt_ns as f64 / 1_000_000.0),
            correct: Some(correct),
            timed_out: false,
        }
    }

    pub fn timed_out(spec: TrialSpec, onset_ns: u64) -> Self {
        Self {
            spec,
            onset_ns,
            response_key: None,
            response_ns: None,
            reaction_time_ms: None,
            correct: None,
            timed_out: true,
        }
    }

    pub fn spec(&self) -> &TrialSpec {
        &self.spec
    }

    pub fn onset_ns(&self) -> u64 {
        self.onset_ns
    }

    pub fn response_key(&self) -> Option<char> {
        self.response_key
    }

    pub fn response_ns(&self) -> Option<u64> {
        self.response_ns
    }

    pub fn reaction_time_ms(&self) -> Option<f64> {
        self.reaction_time_ms
    }

    pub fn correct(&self) -> Option<bool> {
        self.correct
    }

    pub fn is_correct(&self) -> bool {
        self.correct == Some(true)
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }
}
