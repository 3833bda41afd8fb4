/// Incremental rating updates applied after every single vote.
///
/// Two independent systems run side by side in each bucket: a rounded Elo
/// score and a per-comparison Glicko estimate with a rating deviation.
/// Everything here is pure arithmetic on copies; the caller persists results.
use std::f64::consts::PI;

use crate::constants::{ELO_K_FACTOR, INITIAL_RD, MIN_RD};
use crate::types::{Category, CategoryStats, RatingRecord, Segment};

/// Glicko scale constant `ln(10) / 400`.
const Q: f64 = std::f64::consts::LN_10 / 400.0;

/// Elo expected score of A against B.
pub fn elo_expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
}

/// New (winner, loser) Elo ratings, rounded to the nearest integer.
pub fn elo_update(winner_rating: f64, loser_rating: f64) -> (f64, f64) {
    let expected_winner = elo_expected_score(winner_rating, loser_rating);
    let expected_loser = 1.0 - expected_winner;
    (
        (winner_rating + ELO_K_FACTOR * (1.0 - expected_winner)).round(),
        (loser_rating + ELO_K_FACTOR * (0.0 - expected_loser)).round(),
    )
}

/// Glicko attenuation factor for an opponent's deviation.
pub fn glicko_g(rd: f64) -> f64 {
    1.0 / (1.0 + 3.0 * Q * Q * rd * rd / (PI * PI)).sqrt()
}

/// Glicko expected score of an item rated `rating` against an opponent.
pub fn glicko_expected_score(rating: f64, opponent_rating: f64, opponent_rd: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-glicko_g(opponent_rd) * (rating - opponent_rating) / 400.0))
}

/// One-comparison Glicko step. `score` is 1.0 for a win, 0.0 for a loss.
///
/// Returns the new (rating, rd). RD never drops below `MIN_RD`.
pub fn glicko_update(
    rating: f64,
    rd: f64,
    opponent_rating: f64,
    opponent_rd: f64,
    score: f64,
) -> (f64, f64) {
    let g = glicko_g(opponent_rd);
    let expected = glicko_expected_score(rating, opponent_rating, opponent_rd);
    let v = Q * Q * g * g * expected * (1.0 - expected);
    let precision = 1.0 / (rd * rd) + v;

    let new_rating = rating + Q * g * (score - expected) / precision;
    let new_rd = (1.0 / precision).sqrt().max(MIN_RD);
    (new_rating, new_rd)
}

/// Grow a deviation for `periods` rating periods of inactivity, capped at `INITIAL_RD`.
///
/// `c` is the per-period uncertainty growth constant. Not applied per vote.
pub fn inflate_rd(rd: f64, periods: f64, c: f64) -> f64 {
    (rd * rd + c * c * periods).sqrt().min(INITIAL_RD)
}

fn update_bucket(winner: &mut CategoryStats, loser: &mut CategoryStats) {
    let (winner_elo, loser_elo) = elo_update(winner.elo, loser.elo);

    // Both sides see the opponent's pre-update state.
    let (winner_glicko, winner_rd) =
        glicko_update(winner.glicko, winner.rd, loser.glicko, loser.rd, 1.0);
    let (loser_glicko, loser_rd) =
        glicko_update(loser.glicko, loser.rd, winner.glicko, winner.rd, 0.0);

    winner.elo = winner_elo;
    winner.glicko = winner_glicko;
    winner.rd = winner_rd;
    winner.comparisons += 1;
    winner.wins += 1;

    loser.elo = loser_elo;
    loser.glicko = loser_glicko;
    loser.rd = loser_rd;
    loser.comparisons += 1;
    loser.losses += 1;
}

/// Apply one vote outcome.
///
/// The overall bucket always updates; the voter's segment bucket updates as
/// well when the segment has one. Versions are left untouched.
pub fn apply_vote(
    winner: &RatingRecord,
    loser: &RatingRecord,
    segment: Segment,
) -> (RatingRecord, RatingRecord) {
    let mut new_winner = winner.clone();
    let mut new_loser = loser.clone();

    let categories = std::iter::once(Category::Overall).chain(segment.category());
    for category in categories {
        update_bucket(
            new_winner.stats_mut(category),
            new_loser.stats_mut(category),
        );
    }

    (new_winner, new_loser)
}
