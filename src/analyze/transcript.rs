// src/analyze/transcript.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::Depth;

/// Orchestrator states. Quick runs go `Planning -> Finalizing -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Planning,
    Critiquing,
    FollowUp,
    Finalizing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::Critiquing => "CRITIQUING",
            Self::FollowUp => "FOLLOW_UP",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
        }
    }

    /// Transition after this stage's output has been validated.
    pub fn next(self, depth: Depth) -> Stage {
        match (self, depth) {
            (Self::Planning, Depth::Quick) => Self::Finalizing,
            (Self::Planning, Depth::Deep) => Self::Critiquing,
            (Self::Critiquing, _) => Self::FollowUp,
            (Self::FollowUp, _) => Self::Finalizing,
            (Self::Finalizing, _) | (Self::Done, _) => Self::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted exchange: the prompt sent and the (validated) raw response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub stage: Stage,
    pub prompt: String,
    pub response: String,
}

/// Ordered conversation of a run. Built turn by turn, so any single turn can be
/// replayed by constructing the preceding transcript directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage, prompt: impl Into<String>, response: impl Into<String>) {
        self.turns.push(Turn {
            stage,
            prompt: prompt.into(),
            response: response.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.turns.iter().map(|t| t.stage).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_path_is_short() {
        assert_eq!(Stage::Planning.next(Depth::Quick), Stage::Finalizing);
        assert_eq!(Stage::Finalizing.next(Depth::Quick), Stage::Done);
    }

    #[test]
    fn deep_path_visits_every_stage() {
        let mut s = Stage::Planning;
        let mut seen = vec![s];
        while s != Stage::Done {
            s = s.next(Depth::Deep);
            seen.push(s);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Planning,
                Stage::Critiquing,
                Stage::FollowUp,
                Stage::Finalizing,
                Stage::Done
            ]
        );
    }

    #[test]
    fn display_matches_event_names() {
        assert_eq!(Stage::FollowUp.to_string(), "FOLLOW_UP");
        assert_eq!(
            serde_json::to_string(&Stage::FollowUp).unwrap(),
            "\"FOLLOW_UP\""
        );
    }
}
