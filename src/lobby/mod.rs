//! Lobby lifecycle for captain-draft pickup games
//!
//! A lobby fills from the queue, picks two captains and a map, runs a
//! turn-based draft and then waits for both captains to agree on the result.

pub mod captains;
pub mod consensus;
pub mod draft;
pub mod instance;
pub mod registry;

// Re-export commonly used types
pub use captains::{CaptainPair, CaptainSelector};
pub use consensus::{ReportRound, Verdict};
pub use draft::{Draft, PickOutcome};
pub use instance::{LobbyInstance, LobbyState, QueuePopped};
pub use registry::{LobbyRegistry, LobbyRegistryStats};
