//! Common types used throughout the lobby service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillratings::glicko2::Glicko2Rating;

/// Stable external identifier of a registered player
pub type PlayerId = u64;

/// Sequential identifier of a lobby, shown to players as "Lobby #N"
pub type LobbyId = u32;

/// One of the two sides of a match. Team A (team 1) always picks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    /// The opposing team
    pub fn other(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }

    /// Team number as players know it (1 or 2)
    pub fn number(self) -> u8 {
        match self {
            Team::A => 1,
            Team::B => 2,
        }
    }

    /// Parse a team number typed by a player or administrator
    pub fn from_number(number: u8) -> Option<Team> {
        match number {
            1 => Some(Team::A),
            2 => Some(Team::B),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Team::A => 0,
            Team::B => 1,
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Team {}", self.number())
    }
}

/// Per-team storage indexed by [`Team`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerTeam<T> {
    pub a: T,
    pub b: T,
}

impl<T> PerTeam<T> {
    pub fn new(a: T, b: T) -> Self {
        Self { a, b }
    }

    pub fn get(&self, team: Team) -> &T {
        match team {
            Team::A => &self.a,
            Team::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, team: Team) -> &mut T {
        match team {
            Team::A => &mut self.a,
            Team::B => &mut self.b,
        }
    }
}

impl<T> std::ops::Index<Team> for PerTeam<T> {
    type Output = T;

    fn index(&self, team: Team) -> &T {
        [&self.a, &self.b][team.index()]
    }
}

/// A captain's claim about their own team's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    /// The team this claim declares as winner, given the reporter's team
    pub fn winner_for(self, reporter: Team) -> Team {
        match self {
            Outcome::Win => reporter,
            Outcome::Loss => reporter.other(),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "win" => Ok(Outcome::Win),
            "loss" => Ok(Outcome::Loss),
            other => Err(format!("expected 'win' or 'loss', got '{}'", other)),
        }
    }
}

/// Glicko-2 style rating tuple carried per player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

impl Default for RatingSnapshot {
    fn default() -> Self {
        Self {
            rating: 1500.0,
            deviation: 350.0,
            volatility: 0.06,
        }
    }
}

impl From<Glicko2Rating> for RatingSnapshot {
    fn from(rating: Glicko2Rating) -> Self {
        Self {
            rating: rating.rating,
            deviation: rating.deviation,
            volatility: rating.volatility,
        }
    }
}

impl From<RatingSnapshot> for Glicko2Rating {
    fn from(snapshot: RatingSnapshot) -> Self {
        Self {
            rating: snapshot.rating,
            deviation: snapshot.deviation,
            volatility: snapshot.volatility,
        }
    }
}

/// A registered player as stored by the player repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub username: String,
    pub skill_rating: f64,
    pub rating_deviation: f64,
    pub volatility: f64,
    /// Skill rating before the most recent rating update
    pub previous_skill_rating: f64,
    pub wins: u32,
    pub losses: u32,
}

impl PlayerRecord {
    /// Create a freshly registered player with the given starting rating
    pub fn new(id: PlayerId, username: impl Into<String>, initial: RatingSnapshot) -> Self {
        Self {
            id,
            username: username.into(),
            skill_rating: initial.rating,
            rating_deviation: initial.deviation,
            volatility: initial.volatility,
            previous_skill_rating: initial.rating,
            wins: 0,
            losses: 0,
        }
    }

    /// Total number of rated matches played
    pub fn games_played(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn rating(&self) -> RatingSnapshot {
        RatingSnapshot {
            rating: self.skill_rating,
            deviation: self.rating_deviation,
            volatility: self.volatility,
        }
    }
}

/// A playable map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Map {
    pub id: u32,
    pub name: String,
}

/// Rating movement of a single player after a committed match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player_id: PlayerId,
    pub username: String,
    pub team: Team,
    pub won: bool,
    pub previous_rating: f64,
    pub new_rating: RatingSnapshot,
}

impl RatingChange {
    pub fn delta(&self) -> f64 {
        self.new_rating.rating - self.previous_rating
    }
}

/// Summary of a committed match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub lobby_id: LobbyId,
    pub winner: Team,
    /// Whether an administrator forced the result
    pub forced: bool,
    pub rating_changes: Vec<RatingChange>,
}

/// Outcome of a successful captain report
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// First report recorded; the other captain has to confirm
    AwaitingConfirmation { claimed_winner: Team },
    /// Both captains agreed and ratings were committed
    Committed(MatchResult),
}

/// Event emitted when a player joins a queuing lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerJoinedQueue {
    pub lobby_id: LobbyId,
    pub player_id: PlayerId,
    pub username: String,
    pub queued: Vec<PlayerId>,
    pub capacity: usize,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a player leaves a queuing lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerLeftQueue {
    pub lobby_id: LobbyId,
    pub player_id: PlayerId,
    pub username: String,
    pub queued: Vec<PlayerId>,
    pub capacity: usize,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a queue fills and captains have been chosen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftStarted {
    pub lobby_id: LobbyId,
    pub captain_a: PlayerId,
    pub captain_b: PlayerId,
    pub map: Map,
    pub remaining: Vec<PlayerId>,
    pub first_pick: Team,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted after a successful pick that leaves the draft open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPicked {
    pub lobby_id: LobbyId,
    pub picked_by: PlayerId,
    pub team: Team,
    pub player_id: PlayerId,
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
    pub remaining: Vec<PlayerId>,
    pub next_turn: Team,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted once both teams are complete and the match can be played
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStarted {
    pub lobby_id: LobbyId,
    pub map: Map,
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted after the first captain report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPending {
    pub lobby_id: LobbyId,
    pub reported_by: PlayerId,
    pub claimed_winner: Team,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when captains disagree and the round was reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConflict {
    pub lobby_id: LobbyId,
    pub captain_a: PlayerId,
    pub captain_b: PlayerId,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted after a result has been committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchComplete {
    pub lobby_id: LobbyId,
    pub winner: Team,
    pub forced: bool,
    pub rating_changes: Vec<RatingChange>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a command was rejected, so the sender learns why
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRejected {
    /// Lobby the rejection concerns, when known
    pub lobby_id: Option<LobbyId>,
    pub command: LobbyCommand,
    /// Machine-readable error label
    pub kind: String,
    pub message: String,
    /// Correlation id of the command message, if it carried one
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound lobby events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyEvent {
    PlayerJoinedQueue(PlayerJoinedQueue),
    PlayerLeftQueue(PlayerLeftQueue),
    DraftStarted(DraftStarted),
    PlayerPicked(PlayerPicked),
    MatchStarted(MatchStarted),
    ReportPending(ReportPending),
    ReportConflict(ReportConflict),
    MatchComplete(MatchComplete),
    CommandRejected(CommandRejected),
}

impl LobbyEvent {
    pub fn lobby_id(&self) -> LobbyId {
        match self {
            LobbyEvent::PlayerJoinedQueue(e) => e.lobby_id,
            LobbyEvent::PlayerLeftQueue(e) => e.lobby_id,
            LobbyEvent::DraftStarted(e) => e.lobby_id,
            LobbyEvent::PlayerPicked(e) => e.lobby_id,
            LobbyEvent::MatchStarted(e) => e.lobby_id,
            LobbyEvent::ReportPending(e) => e.lobby_id,
            LobbyEvent::ReportConflict(e) => e.lobby_id,
            LobbyEvent::MatchComplete(e) => e.lobby_id,
            LobbyEvent::CommandRejected(e) => e.lobby_id.unwrap_or_default(),
        }
    }

    /// Event name, as used in logs and test assertions
    pub fn name(&self) -> &'static str {
        match self {
            LobbyEvent::PlayerJoinedQueue(_) => "PlayerJoinedQueue",
            LobbyEvent::PlayerLeftQueue(_) => "PlayerLeftQueue",
            LobbyEvent::DraftStarted(_) => "DraftStarted",
            LobbyEvent::PlayerPicked(_) => "PlayerPicked",
            LobbyEvent::MatchStarted(_) => "MatchStarted",
            LobbyEvent::ReportPending(_) => "ReportPending",
            LobbyEvent::ReportConflict(_) => "ReportConflict",
            LobbyEvent::MatchComplete(_) => "MatchComplete",
            LobbyEvent::CommandRejected(_) => "CommandRejected",
        }
    }
}

/// Inbound commands, already validated for permissions and channel routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyCommand {
    JoinQueue {
        player_id: PlayerId,
    },
    LeaveQueue {
        player_id: PlayerId,
    },
    Pick {
        captain_id: PlayerId,
        target_id: PlayerId,
    },
    Report {
        captain_id: PlayerId,
        outcome: Outcome,
    },
    ForceResult {
        lobby_id: LobbyId,
        winning_team: u8,
    },
}

impl LobbyCommand {
    pub fn name(&self) -> &'static str {
        match self {
            LobbyCommand::JoinQueue { .. } => "join_queue",
            LobbyCommand::LeaveQueue { .. } => "leave_queue",
            LobbyCommand::Pick { .. } => "pick",
            LobbyCommand::Report { .. } => "report",
            LobbyCommand::ForceResult { .. } => "force_result",
        }
    }
}
