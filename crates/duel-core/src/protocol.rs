use serde::{Deserialize, Serialize};

use crate::model::{Match, MatchId, MatchStatus, UserId};

/// Messages sent from client to server over the duel socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a user and a match group.
    Auth { user_id: UserId, match_id: MatchId },
    /// Announce an answer to the opponent. Adjudication happens elsewhere.
    Answer { match_id: MatchId, answer: String },
    Chat { match_id: MatchId, message: String },
}

/// Messages sent from server to client over the duel socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PlayerJoined {
        user_id: UserId,
        timestamp: f64,
    },
    AnswerSubmitted {
        user_id: UserId,
        answer: String,
        timestamp: f64,
    },
    Chat {
        user_id: UserId,
        message: String,
        timestamp: f64,
    },
    PlayerLeft {
        user_id: UserId,
        timestamp: f64,
    },
    /// The second player joined and the duel is on.
    MatchStarted {
        match_id: MatchId,
        player1_id: UserId,
        player2_id: UserId,
        timestamp: f64,
    },
    /// Both answers are in. `winner_id` is absent when nobody won.
    MatchFinished {
        match_id: MatchId,
        winner_id: Option<UserId>,
        timestamp: f64,
    },
}

/// Current wall-clock time as fractional epoch seconds, the socket timestamp format.
pub fn timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// -- HTTP match API ------------------------------------------------------------

/// Body of `POST /matches`, `POST /matches/{id}/join` and `POST /matches/{id}/cancel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRequest {
    pub user_id: UserId,
}

/// Body of `POST /matches/{id}/answer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub user_id: UserId,
    pub answer: String,
    /// Milliseconds the player spent on the problem
    #[serde(default)]
    pub time_spent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCreated {
    pub match_id: MatchId,
}

/// Result of an answer submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub finished: bool,
    pub winner_id: Option<UserId>,
}

/// Row of the active match listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMatch {
    pub id: MatchId,
    pub status: MatchStatus,
    pub player1_id: UserId,
    pub player2_id: Option<UserId>,
    pub problem_id: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Match> for ActiveMatch {
    fn from(m: &Match) -> Self {
        Self {
            id: m.id,
            status: m.status,
            player1_id: m.player1_id,
            player2_id: m.player2_id,
            problem_id: m.problem_id,
            started_at: m.started_at,
        }
    }
}
