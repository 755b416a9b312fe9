//! Duel lifecycle: create, join, submit, finalize.
//!
//! Every operation on a match runs under that match's lock, held across the
//! whole read-decide-write sequence, so two players submitting at the same
//! moment cannot both observe "one answer missing" or both finalize.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use duel_core::protocol::{SubmitOutcome, timestamp};
use duel_core::{Match, MatchId, MatchStatus, ServerMessage, Slot, UserId, judge};

use crate::broadcast::MatchBroadcaster;
use crate::error::{DuelError, DuelResult};
use crate::store::{Decided, MatchStore, MatchUpdate};

/// Listing size used by the active match endpoint when none is given.
pub const DEFAULT_ACTIVE_LIMIT: i64 = 20;

pub struct DuelCoordinator {
    store: Arc<dyn MatchStore>,
    broadcaster: MatchBroadcaster,
    locks: DashMap<MatchId, Arc<Mutex<()>>>,
}

impl DuelCoordinator {
    pub fn new(store: Arc<dyn MatchStore>, broadcaster: MatchBroadcaster) -> Self {
        Self {
            store,
            broadcaster,
            locks: DashMap::new(),
        }
    }

    /// Open a new match for `initiator_id` on a random problem.
    #[instrument(skip(self))]
    pub async fn create(&self, initiator_id: UserId) -> DuelResult<MatchId> {
        let problem_id = self
            .store
            .random_problem()
            .await?
            .ok_or_else(|| DuelError::not_found("No problems available"))?;
        let match_id = self.store.create_match(initiator_id, problem_id).await?;
        info!(match_id, problem_id, "match created, waiting for opponent");
        Ok(match_id)
    }

    pub async fn get(&self, match_id: MatchId) -> DuelResult<Match> {
        self.load(match_id).await
    }

    pub async fn active(&self, limit: i64) -> DuelResult<Vec<Match>> {
        Ok(self.store.active_matches(limit).await?)
    }

    /// Take the second seat of a waiting match and start it.
    #[instrument(skip(self))]
    pub async fn join(&self, match_id: MatchId, joiner_id: UserId) -> DuelResult<()> {
        let lock = self.lock_for(match_id);
        let result = {
            let _guard = lock.lock().await;
            self.join_locked(match_id, joiner_id).await
        };
        self.release(match_id, lock);
        result
    }

    /// Record a player's answer; finalizes the match once both are in.
    ///
    /// A player may resubmit while the opponent has not answered yet; the
    /// latest answer and time replace the earlier ones.
    #[instrument(skip(self, answer))]
    pub async fn submit_answer(
        &self,
        match_id: MatchId,
        submitter_id: UserId,
        answer: &str,
        elapsed_ms: i64,
    ) -> DuelResult<SubmitOutcome> {
        let lock = self.lock_for(match_id);
        let result = {
            let _guard = lock.lock().await;
            self.submit_locked(match_id, submitter_id, answer, elapsed_ms)
                .await
        };
        self.release(match_id, lock);
        result
    }

    /// Abandon a match nobody has joined yet. Only its creator may do so.
    #[instrument(skip(self))]
    pub async fn cancel(&self, match_id: MatchId, requester_id: UserId) -> DuelResult<()> {
        let lock = self.lock_for(match_id);
        let result = {
            let _guard = lock.lock().await;
            self.cancel_locked(match_id, requester_id).await
        };
        self.release(match_id, lock);
        result
    }

    async fn join_locked(&self, match_id: MatchId, joiner_id: UserId) -> DuelResult<()> {
        let m = self.load(match_id).await?;
        if !m.status.can_transition(MatchStatus::Active) {
            return Err(DuelError::invalid_state(
                "Match has already started or finished",
            ));
        }
        if m.player1_id == joiner_id {
            return Err(DuelError::forbidden("Cannot join your own match"));
        }

        let update = MatchUpdate {
            player2_id: Some(joiner_id),
            status: Some(MatchStatus::Active),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store.update_match(match_id, &update).await?;
        info!(match_id, player1_id = m.player1_id, player2_id = joiner_id, "match started");

        self.broadcaster.broadcast(
            match_id,
            &ServerMessage::MatchStarted {
                match_id,
                player1_id: m.player1_id,
                player2_id: joiner_id,
                timestamp: timestamp(),
            },
            None,
        );
        Ok(())
    }

    async fn submit_locked(
        &self,
        match_id: MatchId,
        submitter_id: UserId,
        answer: &str,
        elapsed_ms: i64,
    ) -> DuelResult<SubmitOutcome> {
        let mut m = self.load(match_id).await?;
        if m.status != MatchStatus::Active {
            return Err(DuelError::invalid_state(if m.status.is_terminal() {
                "Match is already over"
            } else {
                "Match has not started yet"
            }));
        }
        let slot = m
            .slot_of(submitter_id)
            .ok_or_else(|| DuelError::forbidden("You are not a participant in this match"))?;

        let answer = answer.trim().to_string();
        let mut update = MatchUpdate::default();
        match slot {
            Slot::Player1 => {
                m.player1_answer = Some(answer.clone());
                m.player1_time = Some(elapsed_ms);
                update.player1_answer = Some(answer);
                update.player1_time = Some(elapsed_ms);
            }
            Slot::Player2 => {
                m.player2_answer = Some(answer.clone());
                m.player2_time = Some(elapsed_ms);
                update.player2_answer = Some(answer);
                update.player2_time = Some(elapsed_ms);
            }
        }

        if !m.both_answered() {
            self.store.update_match(match_id, &update).await?;
            info!(match_id, submitter_id, "answer recorded, waiting for opponent");
            return Ok(SubmitOutcome {
                finished: false,
                winner_id: None,
            });
        }

        self.finalize(&m, update).await
    }

    /// Judge a fully answered match and commit the result together with the
    /// submission that completed it.
    async fn finalize(&self, m: &Match, mut update: MatchUpdate) -> DuelResult<SubmitOutcome> {
        let expected = match self.store.problem_answer(m.problem_id).await? {
            Some(answer) => answer,
            None => {
                warn!(
                    match_id = m.id,
                    problem_id = m.problem_id,
                    "problem missing, judging against empty answer"
                );
                String::new()
            }
        };
        let verdict = judge::adjudicate(m, &expected);

        update.status = Some(MatchStatus::Finished);
        update.finished_at = Some(Utc::now());
        update.winner_id = verdict.winner_id;

        let decided = match (verdict.winner_id, verdict.loser_id) {
            (Some(winner_id), Some(loser_id)) => Some(Decided {
                winner_id,
                loser_id,
            }),
            _ => None,
        };
        let changes = self.store.finish_match(m.id, &update, decided).await?;
        for change in &changes {
            debug!(
                match_id = m.id,
                user_id = change.user_id,
                rating = change.rating,
                "rating updated"
            );
        }
        info!(match_id = m.id, winner_id = ?verdict.winner_id, "match finished");

        self.broadcaster.broadcast(
            m.id,
            &ServerMessage::MatchFinished {
                match_id: m.id,
                winner_id: verdict.winner_id,
                timestamp: timestamp(),
            },
            None,
        );

        Ok(SubmitOutcome {
            finished: true,
            winner_id: verdict.winner_id,
        })
    }

    async fn cancel_locked(&self, match_id: MatchId, requester_id: UserId) -> DuelResult<()> {
        let m = self.load(match_id).await?;
        if !m.status.can_transition(MatchStatus::Cancelled) {
            return Err(DuelError::invalid_state(
                "Only a waiting match can be cancelled",
            ));
        }
        if m.player1_id != requester_id {
            return Err(DuelError::forbidden("Only the creator can cancel this match"));
        }

        let update = MatchUpdate {
            status: Some(MatchStatus::Cancelled),
            finished_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store.update_match(match_id, &update).await?;
        info!(match_id, "match cancelled");
        Ok(())
    }

    async fn load(&self, match_id: MatchId) -> DuelResult<Match> {
        self.store
            .get_match(match_id)
            .await?
            .ok_or_else(|| DuelError::not_found(format!("Match {match_id} not found")))
    }

    fn lock_for(&self, match_id: MatchId) -> Arc<Mutex<()>> {
        self.locks.entry(match_id).or_default().clone()
    }

    /// Drop the lock entry once nobody but the map and `lock` holds it.
    fn release(&self, match_id: MatchId, lock: Arc<Mutex<()>>) {
        self.locks
            .remove_if(&match_id, |_, held| Arc::strong_count(held) <= 2);
        drop(lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::sync::mpsc;

    use async_trait::async_trait;
    use duel_core::ProblemId;
    use duel_core::elo::rate_duel;

    use crate::codec::read_frame;
    use crate::db::{self, SqliteStore};
    use crate::registry::{ConnectionId, ConnectionRegistry};
    use crate::store::RatingChange;

    /// Stalls on the answer lookup so finalizes of different matches overlap.
    struct SlowJudging {
        inner: SqliteStore,
    }

    #[async_trait]
    impl MatchStore for SlowJudging {
        async fn random_problem(&self) -> Result<Option<ProblemId>, sqlx::Error> {
            self.inner.random_problem().await
        }

        async fn get_match(&self, id: MatchId) -> Result<Option<Match>, sqlx::Error> {
            self.inner.get_match(id).await
        }

        async fn create_match(
            &self,
            player1_id: UserId,
            problem_id: ProblemId,
        ) -> Result<MatchId, sqlx::Error> {
            self.inner.create_match(player1_id, problem_id).await
        }

        async fn update_match(&self, id: MatchId, update: &MatchUpdate) -> Result<(), sqlx::Error> {
            self.inner.update_match(id, update).await
        }

        async fn finish_match(
            &self,
            id: MatchId,
            update: &MatchUpdate,
            decided: Option<Decided>,
        ) -> Result<Vec<RatingChange>, sqlx::Error> {
            self.inner.finish_match(id, update, decided).await
        }

        async fn problem_answer(
            &self,
            problem_id: ProblemId,
        ) -> Result<Option<String>, sqlx::Error> {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            self.inner.problem_answer(problem_id).await
        }

        async fn user_rating(&self, user_id: UserId) -> Result<Option<f64>, sqlx::Error> {
            self.inner.user_rating(user_id).await
        }

        async fn active_matches(&self, limit: i64) -> Result<Vec<Match>, sqlx::Error> {
            self.inner.active_matches(limit).await
        }
    }

    struct Fixture {
        duel: Arc<DuelCoordinator>,
        store: SqliteStore,
        registry: Arc<ConnectionRegistry>,
        alice: UserId,
        bob: UserId,
    }

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_db(&pool).await.unwrap();
        pool
    }

    async fn fixture() -> Fixture {
        let pool = pool().await;
        db::insert_problem(&pool, "Answer", "What is six times seven?", "42")
            .await
            .unwrap();
        let alice = db::insert_user(&pool, "alice", 1000.0).await.unwrap();
        let bob = db::insert_user(&pool, "bob", 1000.0).await.unwrap();

        let store = SqliteStore::new(pool);
        let registry = Arc::new(ConnectionRegistry::new());
        let duel = Arc::new(DuelCoordinator::new(
            Arc::new(store.clone()),
            MatchBroadcaster::new(registry.clone()),
        ));
        Fixture {
            duel,
            store,
            registry,
            alice,
            bob,
        }
    }

    impl Fixture {
        async fn active_match(&self) -> MatchId {
            let id = self.duel.create(self.alice).await.unwrap();
            self.duel.join(id, self.bob).await.unwrap();
            id
        }

        async fn rating(&self, user: UserId) -> f64 {
            self.store.user_rating(user).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn create_with_empty_pool_is_not_found() {
        let store = SqliteStore::new(pool().await);
        let duel = DuelCoordinator::new(
            Arc::new(store),
            MatchBroadcaster::new(Arc::new(ConnectionRegistry::new())),
        );
        assert!(matches!(duel.create(1).await, Err(DuelError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_then_join_activates() {
        let f = fixture().await;
        let id = f.duel.create(f.alice).await.unwrap();
        let m = f.duel.get(id).await.unwrap();
        assert_eq!(m.status, MatchStatus::Waiting);
        assert_eq!(m.player2_id, None);

        f.duel.join(id, f.bob).await.unwrap();
        let m = f.duel.get(id).await.unwrap();
        assert_eq!(m.status, MatchStatus::Active);
        assert_eq!(m.player2_id, Some(f.bob));
    }

    #[tokio::test]
    async fn join_errors() {
        let f = fixture().await;
        assert!(matches!(
            f.duel.join(999, f.bob).await,
            Err(DuelError::NotFound(_))
        ));

        let id = f.duel.create(f.alice).await.unwrap();
        assert!(matches!(
            f.duel.join(id, f.alice).await,
            Err(DuelError::Forbidden(_))
        ));

        f.duel.join(id, f.bob).await.unwrap();
        assert!(matches!(
            f.duel.join(id, 77).await,
            Err(DuelError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn submit_errors() {
        let f = fixture().await;
        assert!(matches!(
            f.duel.submit_answer(999, f.alice, "42", 1).await,
            Err(DuelError::NotFound(_))
        ));

        let id = f.duel.create(f.alice).await.unwrap();
        assert!(matches!(
            f.duel.submit_answer(id, f.alice, "42", 1).await,
            Err(DuelError::InvalidState(_))
        ));

        f.duel.join(id, f.bob).await.unwrap();
        assert!(matches!(
            f.duel.submit_answer(id, 31337, "42", 1).await,
            Err(DuelError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn finalizes_exactly_once() {
        let f = fixture().await;
        let id = f.active_match().await;

        let first = f.duel.submit_answer(id, f.alice, "41", 30).await.unwrap();
        assert!(!first.finished);
        let again = f.duel.submit_answer(id, f.alice, "42", 10).await.unwrap();
        assert!(!again.finished);

        let last = f.duel.submit_answer(id, f.bob, "42", 20).await.unwrap();
        assert_eq!(
            last,
            SubmitOutcome {
                finished: true,
                winner_id: Some(f.alice)
            }
        );

        let m = f.duel.get(id).await.unwrap();
        assert_eq!(m.status, MatchStatus::Finished);
        assert_eq!(m.winner_id, Some(f.alice));
        assert!(m.finished_at.is_some());
        // Last write won for alice's slot.
        assert_eq!(m.player1_answer.as_deref(), Some("42"));
        assert_eq!(m.player1_time, Some(10));

        // One rating update, applied once.
        assert_eq!(f.rating(f.alice).await, 1016.0);
        assert_eq!(f.rating(f.bob).await, 984.0);

        assert!(matches!(
            f.duel.submit_answer(id, f.bob, "42", 1).await,
            Err(DuelError::InvalidState(_))
        ));
        assert_eq!(f.rating(f.alice).await, 1016.0);
    }

    #[tokio::test]
    async fn faster_correct_answer_wins() {
        let f = fixture().await;
        let id = f.active_match().await;
        f.duel.submit_answer(id, f.alice, "42", 20).await.unwrap();
        let out = f.duel.submit_answer(id, f.bob, "42", 10).await.unwrap();
        assert_eq!(out.winner_id, Some(f.bob));
    }

    #[tokio::test]
    async fn only_correct_answer_wins_regardless_of_time() {
        let f = fixture().await;
        let id = f.active_match().await;
        f.duel.submit_answer(id, f.alice, "43", 1).await.unwrap();
        let out = f.duel.submit_answer(id, f.bob, " 42 ", 5000).await.unwrap();
        assert_eq!(out.winner_id, Some(f.bob));
        assert!(f.rating(f.bob).await > 1000.0);
    }

    #[tokio::test]
    async fn both_wrong_leaves_ratings_alone() {
        let f = fixture().await;
        let id = f.active_match().await;
        f.duel.submit_answer(id, f.alice, "1", 10).await.unwrap();
        let out = f.duel.submit_answer(id, f.bob, "2", 20).await.unwrap();
        assert_eq!(
            out,
            SubmitOutcome {
                finished: true,
                winner_id: None
            }
        );

        let m = f.duel.get(id).await.unwrap();
        assert_eq!(m.status, MatchStatus::Finished);
        assert_eq!(m.winner_id, None);
        assert_eq!(f.rating(f.alice).await, 1000.0);
        assert_eq!(f.rating(f.bob).await, 1000.0);
    }

    #[tokio::test]
    async fn exact_tie_has_no_winner() {
        let f = fixture().await;
        let id = f.active_match().await;
        f.duel.submit_answer(id, f.alice, "42", 15).await.unwrap();
        let out = f.duel.submit_answer(id, f.bob, "42", 15).await.unwrap();
        assert!(out.finished);
        assert_eq!(out.winner_id, None);
        assert_eq!(f.rating(f.alice).await, 1000.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_submits_finalize_once() {
        let f = fixture().await;
        let id = f.active_match().await;

        let a = {
            let duel = f.duel.clone();
            let alice = f.alice;
            tokio::spawn(async move { duel.submit_answer(id, alice, "42", 10).await })
        };
        let b = {
            let duel = f.duel.clone();
            let bob = f.bob;
            tokio::spawn(async move { duel.submit_answer(id, bob, "42", 20).await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert!(a.finished ^ b.finished);
        assert_eq!(f.rating(f.alice).await, 1016.0);
        assert_eq!(f.rating(f.bob).await, 984.0);
        assert!(f.duel.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_finishes_sharing_a_winner_keep_both_updates() {
        let f = fixture().await;
        let carol = db::insert_user(f.store.pool(), "carol", 1000.0)
            .await
            .unwrap();
        let duel = Arc::new(DuelCoordinator::new(
            Arc::new(SlowJudging {
                inner: f.store.clone(),
            }),
            MatchBroadcaster::new(f.registry.clone()),
        ));

        let vs_bob = duel.create(f.alice).await.unwrap();
        duel.join(vs_bob, f.bob).await.unwrap();
        let vs_carol = duel.create(f.alice).await.unwrap();
        duel.join(vs_carol, carol).await.unwrap();
        duel.submit_answer(vs_bob, f.bob, "0", 10).await.unwrap();
        duel.submit_answer(vs_carol, carol, "0", 10).await.unwrap();

        let finishes: Vec<_> = [vs_bob, vs_carol]
            .into_iter()
            .map(|id| {
                let duel = duel.clone();
                let alice = f.alice;
                tokio::spawn(async move { duel.submit_answer(id, alice, "42", 5).await })
            })
            .collect();
        for finish in finishes {
            let outcome = finish.await.unwrap().unwrap();
            assert_eq!(outcome.winner_id, Some(f.alice));
        }

        // Both wins count: the second one is rated from the first one's result.
        let (after_first, _) = rate_duel(1000.0, 1000.0);
        let (after_second, _) = rate_duel(after_first, 1000.0);
        let alice = f.rating(f.alice).await;
        assert!((alice - after_second).abs() < 1e-9);
        assert!((alice - 1031.263693206478).abs() < 1e-9);
        let losers = f.rating(f.bob).await + f.rating(carol).await;
        assert!((losers + alice - 3000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancel_rules() {
        let f = fixture().await;
        let id = f.duel.create(f.alice).await.unwrap();
        assert!(matches!(
            f.duel.cancel(id, f.bob).await,
            Err(DuelError::Forbidden(_))
        ));
        f.duel.cancel(id, f.alice).await.unwrap();
        assert_eq!(f.duel.get(id).await.unwrap().status, MatchStatus::Cancelled);

        assert!(matches!(
            f.duel.join(id, f.bob).await,
            Err(DuelError::InvalidState(_))
        ));
        assert!(matches!(
            f.duel.cancel(id, f.alice).await,
            Err(DuelError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn active_listing() {
        let f = fixture().await;
        let waiting = f.duel.create(f.alice).await.unwrap();
        let finished = f.active_match().await;
        f.duel.submit_answer(finished, f.alice, "0", 1).await.unwrap();
        f.duel.submit_answer(finished, f.bob, "0", 1).await.unwrap();

        let ids: Vec<MatchId> = f
            .duel
            .active(DEFAULT_ACTIVE_LIMIT)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![waiting]);
    }

    #[tokio::test]
    async fn state_changes_reach_the_match_group() {
        let f = fixture().await;
        let id = f.duel.create(f.alice).await.unwrap();

        let conn = ConnectionId::generate();
        let (tx, mut rx) = mpsc::channel(8);
        f.registry.register(conn, tx);
        f.registry.bind(conn, f.alice, id);

        f.duel.join(id, f.bob).await.unwrap();
        f.duel.submit_answer(id, f.alice, "42", 5).await.unwrap();
        f.duel.submit_answer(id, f.bob, "7", 5).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let text = read_frame(&mut &frame[..], 1 << 20).await.unwrap();
            let msg: ServerMessage = serde_json::from_str(&text).unwrap();
            kinds.push(msg);
        }
        assert_eq!(kinds.len(), 2);
        assert!(matches!(
            kinds[0],
            ServerMessage::MatchStarted { player2_id, .. } if player2_id == f.bob
        ));
        assert!(matches!(
            kinds[1],
            ServerMessage::MatchFinished { winner_id: Some(w), .. } if w == f.alice
        ));
    }
}
