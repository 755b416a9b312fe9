pub mod elo;
pub mod judge;
pub mod model;
pub mod protocol;

pub use elo::rate_duel;
pub use judge::{Verdict, adjudicate};
pub use model::{Match, MatchId, MatchStatus, ProblemId, Slot, UserId};
pub use protocol::{ClientMessage, ServerMessage};
