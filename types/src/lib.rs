pub mod api;
pub mod identity;
pub mod payment;
pub mod token;
pub mod tournament;

pub use identity::{IdentityVerification, SESSION_TTL_MS};
pub use payment::{PaymentKind, PaymentRecord, PaymentStatus, PaymentStatusHistoryRecord};
pub use tournament::{
    GameProgressRecord, LeaderboardEntry, ParticipantStatus, TournamentParticipantRecord,
    TournamentRecord, TournamentResultRecord, TournamentStatus,
};
