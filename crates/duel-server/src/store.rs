use async_trait::async_trait;
use chrono::{DateTime, Utc};

use duel_core::{Match, MatchId, MatchStatus, ProblemId, UserId};

/// Field changes applied to a match row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchUpdate {
    pub player2_id: Option<UserId>,
    pub status: Option<MatchStatus>,
    pub player1_answer: Option<String>,
    pub player1_time: Option<i64>,
    pub player2_answer: Option<String>,
    pub player2_time: Option<i64>,
    pub winner_id: Option<UserId>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Winner and loser of a match that did not end without a winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decided {
    pub winner_id: UserId,
    pub loser_id: UserId,
}

/// A user's rating after a decided match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingChange {
    pub user_id: UserId,
    pub rating: f64,
}

/// Persistence behind the duel coordinator.
///
/// Each call is its own transaction. `finish_match` is the one composite unit:
/// the final match update, the rating reads and the rating writes happen in one
/// transaction, so concurrent finishes sharing a player cannot lose an update.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// A problem id picked uniformly from the pool, `None` when the pool is empty.
    async fn random_problem(&self) -> Result<Option<ProblemId>, sqlx::Error>;

    async fn get_match(&self, id: MatchId) -> Result<Option<Match>, sqlx::Error>;

    /// Insert a `waiting` match and return its id.
    async fn create_match(
        &self,
        player1_id: UserId,
        problem_id: ProblemId,
    ) -> Result<MatchId, sqlx::Error>;

    async fn update_match(&self, id: MatchId, update: &MatchUpdate) -> Result<(), sqlx::Error>;

    /// Apply the final update and, for a decided match, the Elo update.
    /// Players without a rating start from the default. Returns the new ratings.
    async fn finish_match(
        &self,
        id: MatchId,
        update: &MatchUpdate,
        decided: Option<Decided>,
    ) -> Result<Vec<RatingChange>, sqlx::Error>;

    async fn problem_answer(&self, problem_id: ProblemId) -> Result<Option<String>, sqlx::Error>;

    async fn user_rating(&self, user_id: UserId) -> Result<Option<f64>, sqlx::Error>;

    /// Waiting and active matches, newest first.
    async fn active_matches(&self, limit: i64) -> Result<Vec<Match>, sqlx::Error>;
}
