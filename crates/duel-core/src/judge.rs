use crate::model::{Match, UserId};

/// Canonical form used for answer comparison: surrounding whitespace trimmed, lowercased.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

pub fn is_correct(answer: &str, expected: &str) -> bool {
    normalize_answer(answer) == normalize_answer(expected)
}

/// Outcome of adjudicating a duel where both answers are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub winner_id: Option<UserId>,
    pub loser_id: Option<UserId>,
}

impl Verdict {
    fn none() -> Self {
        Verdict {
            winner_id: None,
            loser_id: None,
        }
    }

    fn win(winner_id: UserId, loser_id: UserId) -> Self {
        Verdict {
            winner_id: Some(winner_id),
            loser_id: Some(loser_id),
        }
    }
}

/// Decide the winner of a fully answered match against the problem's answer.
///
/// One correct answer wins outright. Two correct answers go to the strictly
/// faster player; equal times leave the match without a winner. Returns no
/// winner when either answer slot or the second player is missing.
pub fn adjudicate(m: &Match, expected: &str) -> Verdict {
    let (Some(p2), Some(a1), Some(a2)) = (
        m.player2_id,
        m.player1_answer.as_deref(),
        m.player2_answer.as_deref(),
    ) else {
        return Verdict::none();
    };
    let p1 = m.player1_id;

    match (is_correct(a1, expected), is_correct(a2, expected)) {
        (true, false) => Verdict::win(p1, p2),
        (false, true) => Verdict::win(p2, p1),
        (true, true) => {
            let t1 = m.player1_time.unwrap_or(0);
            let t2 = m.player2_time.unwrap_or(0);
            if t1 < t2 {
                Verdict::win(p1, p2)
            } else if t2 < t1 {
                Verdict::win(p2, p1)
            } else {
                Verdict::none()
            }
        }
        (false, false) => Verdict::none(),
    }
}
