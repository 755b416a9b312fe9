/// Starting rating for new players
pub const DEFAULT_RATING: f64 = 1000.0;

/// K-factor for ELO calculation
pub const K: f64 = 32.0;

/// Expected score of `player_rating` against `opponent_rating`.
pub fn expected_score(player_rating: f64, opponent_rating: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_rating - player_rating) / 400.0))
}

/// New `(winner, loser)` ratings after a decided duel.
///
/// The loser gives up exactly what the winner gains. Results are not rounded.
pub fn rate_duel(winner_rating: f64, loser_rating: f64) -> (f64, f64) {
    let gain = K * (1.0 - expected_score(winner_rating, loser_rating));
    (winner_rating + gain, loser_rating - gain)
}
