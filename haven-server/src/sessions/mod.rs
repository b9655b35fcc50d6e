//! Reflection and group sessions

mod coordinator;
mod flow;
mod invite;
mod repository;

pub use coordinator::{consumed_minutes, CompletionOutcome, SessionCoordinator, StartOutcome};
pub use flow::{SessionFlow, SessionPhase};
pub use invite::{generate_invite_code, normalize_invite_code, INVITE_CODE_LEN};
pub use repository::SessionRepository;
