use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of distinct card values in a deck. Cards carry values `1..=DECK_SIZE`.
pub const DECK_SIZE: u8 = 100;

/// A single card. Values are unique within an active session: the deck issues
/// each value at most once per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Card(u8);

impl Card {
    pub fn new(value: u8) -> Self {
        debug_assert!((1..=DECK_SIZE).contains(&value));
        Card(value)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-player identifier issued by the server when a player creates or
/// joins a session. Presenting it again re-attaches the same connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        PlayerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short, human-typeable session identifier. Matching is case-insensitive;
/// generated ids are uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical uppercase form used as the registry key.
    pub fn normalized(&self) -> String {
        self.0.to_ascii_uppercase()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bonus granted on completing a milestone round, displayed until the next
/// round transition supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LevelReward {
    #[default]
    None,
    Life,
    Star,
}

/// A player as shown in the lobby roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    pub name: String,
    pub is_ready: bool,
}

/// Another player as seen from one player's perspective during a game: their
/// hand is reported only as a count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherPlayer {
    pub name: String,
    pub card_count: usize,
    pub is_voting: bool,
}

/// One player's denormalized view of their session. All shared fields (round,
/// lives, stars, played cards, reward) are identical across the session's
/// players at any instant; only the own-hand/others split differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionView {
    InLobby {
        session_id: String,
        players: Vec<LobbyPlayer>,
        is_ready: bool,
    },
    InGame {
        round: u32,
        round_count: u32,
        hand: Vec<Card>,
        others: Vec<OtherPlayer>,
        lives: u32,
        stars: i32,
        played_cards: Vec<Card>,
        level_reward: LevelReward,
        is_voting: bool,
    },
    Won,
    Lost,
    PlayerLeft {
        player_name: String,
    },
}

/// A player-scoped action on a session. The transport resolves the player id;
/// the coordinator applies the action under the session lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    SetReady { ready: bool },
    PlayCard,
    VoteToThrowStar,
    RevokeVote,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // Client -> server
    Create {
        player_name: String,
    },
    Join {
        session_id: String,
        player_name: String,
    },
    Reconnect {
        player_id: PlayerId,
    },
    Act {
        action: Action,
    },
    Heartbeat,

    // Server -> client
    Connected {
        player_id: PlayerId,
        session_id: String,
    },
    View {
        view: SessionView,
    },
    Error {
        reason: String,
    },
}
