use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};

use duel_core::elo::{self, DEFAULT_RATING};
use duel_core::{Match, MatchId, MatchStatus, ProblemId, UserId};

use crate::store::{Decided, MatchStore, MatchUpdate, RatingChange};

/// Problems seeded into an empty pool: (title, description, answer).
const DEFAULT_PROBLEMS: &[(&str, &str, &str)] = &[
    ("Sum", "What is 2 + 2?", "4"),
    ("Square", "What is the square of 7?", "49"),
    ("Prime", "Is 29 a prime number? (yes/no)", "yes"),
    ("Perimeter", "Perimeter of a square with side 8 cm?", "32"),
    ("Circle area", "Area of a circle with radius 5 (pi = 3.14)?", "78.5"),
    ("Equation", "Solve 3x - 7 = 14.", "7"),
    ("Percent", "What is 20% of 150?", "30"),
    ("Power", "Compute 2^5.", "32"),
    ("Factorial", "Compute 5!.", "120"),
    ("Hypotenuse", "Legs of a right triangle are 3 and 4. Hypotenuse?", "5"),
];

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT UNIQUE,
            rating REAL NOT NULL DEFAULT 1000,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS problems (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            answer TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY,
            player1_id INTEGER NOT NULL,
            player2_id INTEGER,
            problem_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'waiting',
            player1_answer TEXT,
            player2_answer TEXT,
            player1_time INTEGER,
            player2_time INTEGER,
            winner_id INTEGER,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            FOREIGN KEY (problem_id) REFERENCES problems(id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Fill an empty problem pool with the default set. Returns how many were added.
pub async fn seed_problems(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM problems")
        .fetch_one(pool)
        .await?
        .get("n");
    if count > 0 {
        return Ok(0);
    }

    for (title, description, answer) in DEFAULT_PROBLEMS {
        insert_problem(pool, title, description, answer).await?;
    }
    Ok(DEFAULT_PROBLEMS.len())
}

pub async fn insert_problem(
    pool: &SqlitePool,
    title: &str,
    description: &str,
    answer: &str,
) -> Result<ProblemId, sqlx::Error> {
    let res = sqlx::query("INSERT INTO problems (title, description, answer) VALUES (?1, ?2, ?3)")
        .bind(title)
        .bind(description)
        .bind(answer)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

pub async fn insert_user(
    pool: &SqlitePool,
    username: &str,
    rating: f64,
) -> Result<UserId, sqlx::Error> {
    let res = sqlx::query("INSERT INTO users (username, rating) VALUES (?1, ?2)")
        .bind(username)
        .bind(rating)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

async fn rating_in(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: UserId,
) -> Result<f64, sqlx::Error> {
    let row = sqlx::query("SELECT rating FROM users WHERE id = ?1")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map_or(DEFAULT_RATING, |r| r.get::<f64, _>("rating")))
}

fn match_from_row(r: &SqliteRow) -> Result<Match, sqlx::Error> {
    let status: String = r.try_get("status")?;
    let status = MatchStatus::parse(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown match status '{status}'").into()))?;

    Ok(Match {
        id: r.try_get("id")?,
        player1_id: r.try_get("player1_id")?,
        player2_id: r.try_get("player2_id")?,
        problem_id: r.try_get("problem_id")?,
        status,
        player1_answer: r.try_get("player1_answer")?,
        player2_answer: r.try_get("player2_answer")?,
        player1_time: r.try_get("player1_time")?,
        player2_time: r.try_get("player2_time")?,
        winner_id: r.try_get("winner_id")?,
        started_at: r.try_get("started_at")?,
        finished_at: r.try_get("finished_at")?,
    })
}

/// `UPDATE matches SET ...` for the populated fields, `None` when nothing changes.
fn update_query(id: MatchId, update: &MatchUpdate) -> Option<QueryBuilder<'static, Sqlite>> {
    if *update == MatchUpdate::default() {
        return None;
    }

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE matches SET ");
    {
        let mut set = qb.separated(", ");
        if let Some(v) = update.player2_id {
            set.push("player2_id = ").push_bind_unseparated(v);
        }
        if let Some(v) = update.status {
            set.push("status = ").push_bind_unseparated(v.as_str());
        }
        if let Some(v) = &update.player1_answer {
            set.push("player1_answer = ").push_bind_unseparated(v.clone());
        }
        if let Some(v) = update.player1_time {
            set.push("player1_time = ").push_bind_unseparated(v);
        }
        if let Some(v) = &update.player2_answer {
            set.push("player2_answer = ").push_bind_unseparated(v.clone());
        }
        if let Some(v) = update.player2_time {
            set.push("player2_time = ").push_bind_unseparated(v);
        }
        if let Some(v) = update.winner_id {
            set.push("winner_id = ").push_bind_unseparated(v);
        }
        if let Some(v) = update.started_at {
            set.push("started_at = ").push_bind_unseparated(v);
        }
        if let Some(v) = update.finished_at {
            set.push("finished_at = ").push_bind_unseparated(v);
        }
    }
    qb.push(" WHERE id = ").push_bind(id);
    Some(qb)
}

/// SQLite-backed [`MatchStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MatchStore for SqliteStore {
    async fn random_problem(&self) -> Result<Option<ProblemId>, sqlx::Error> {
        let ids: Vec<ProblemId> = sqlx::query("SELECT id FROM problems")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.get::<i64, _>("id"))
            .collect();

        if ids.is_empty() {
            return Ok(None);
        }
        let idx = {
            use rand::RngExt;
            let mut rng = rand::rng();
            rng.random_range(0..ids.len())
        };
        Ok(Some(ids[idx]))
    }

    async fn get_match(&self, id: MatchId) -> Result<Option<Match>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM matches WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn create_match(
        &self,
        player1_id: UserId,
        problem_id: ProblemId,
    ) -> Result<MatchId, sqlx::Error> {
        let res = sqlx::query(
            "INSERT INTO matches (player1_id, problem_id, status, started_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(player1_id)
        .bind(problem_id)
        .bind(MatchStatus::Waiting.as_str())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    async fn update_match(&self, id: MatchId, update: &MatchUpdate) -> Result<(), sqlx::Error> {
        if let Some(mut q) = update_query(id, update) {
            q.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn finish_match(
        &self,
        id: MatchId,
        update: &MatchUpdate,
        decided: Option<Decided>,
    ) -> Result<Vec<RatingChange>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // The match write comes first so the transaction holds the write lock
        // before any rating is read.
        if let Some(mut q) = update_query(id, update) {
            q.build().execute(&mut *tx).await?;
        }

        let Some(Decided { winner_id, loser_id }) = decided else {
            tx.commit().await?;
            return Ok(Vec::new());
        };

        let winner_rating = rating_in(&mut tx, winner_id).await?;
        let loser_rating = rating_in(&mut tx, loser_id).await?;
        let (new_winner, new_loser) = elo::rate_duel(winner_rating, loser_rating);
        let changes = vec![
            RatingChange {
                user_id: winner_id,
                rating: new_winner,
            },
            RatingChange {
                user_id: loser_id,
                rating: new_loser,
            },
        ];

        // Players without a local row get one, so the rating is never lost.
        for change in &changes {
            sqlx::query(
                "INSERT INTO users (id, rating) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET rating = excluded.rating",
            )
            .bind(change.user_id)
            .bind(change.rating)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(changes)
    }

    async fn problem_answer(&self, problem_id: ProblemId) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT answer FROM problems WHERE id = ?1")
            .bind(problem_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("answer")))
    }

    async fn user_rating(&self, user_id: UserId) -> Result<Option<f64>, sqlx::Error> {
        let row = sqlx::query("SELECT rating FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<f64, _>("rating")))
    }

    async fn active_matches(&self, limit: i64) -> Result<Vec<Match>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM matches
             WHERE status IN ('waiting', 'active')
             ORDER BY started_at DESC, id DESC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(match_from_row).collect()
    }
}
