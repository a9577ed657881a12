//! SQLite connection participant

mod participant;

pub use participant::SqliteParticipant;
