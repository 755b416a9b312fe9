use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type MatchId = i64;
pub type ProblemId = i64;

/// Match state machine.
///
/// `Waiting -> Active -> Finished`, with `Cancelled` as the other way out of
/// `Waiting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Active,
    Finished,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::Active => "active",
            MatchStatus::Finished => "finished",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<MatchStatus> {
        match s {
            "waiting" => Some(MatchStatus::Waiting),
            "active" => Some(MatchStatus::Active),
            "finished" => Some(MatchStatus::Finished),
            "cancelled" => Some(MatchStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Finished | MatchStatus::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition(&self, next: MatchStatus) -> bool {
        matches!(
            (self, next),
            (MatchStatus::Waiting, MatchStatus::Active)
                | (MatchStatus::Waiting, MatchStatus::Cancelled)
                | (MatchStatus::Active, MatchStatus::Finished)
        )
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a duel a player sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Player1,
    Player2,
}

/// A persisted duel record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub player1_id: UserId,
    pub player2_id: Option<UserId>,
    pub problem_id: ProblemId,
    pub status: MatchStatus,
    pub player1_answer: Option<String>,
    pub player2_answer: Option<String>,
    /// Milliseconds
    pub player1_time: Option<i64>,
    pub player2_time: Option<i64>,
    pub winner_id: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Match {
    /// The slot `user_id` occupies, if they take part in this match.
    pub fn slot_of(&self, user_id: UserId) -> Option<Slot> {
        if self.player1_id == user_id {
            Some(Slot::Player1)
        } else if self.player2_id == Some(user_id) {
            Some(Slot::Player2)
        } else {
            None
        }
    }

    pub fn both_answered(&self) -> bool {
        self.player1_answer.is_some() && self.player2_answer.is_some()
    }
}
