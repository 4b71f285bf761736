//! Authoritative session state machine and game-rule algorithms.

use crate::connection::{Connection, Player};
use crate::deck::Deck;
use crate::error::CoordinatorError;
use log::{debug, info, warn};
use shared::{
    Card, LevelReward, LobbyPlayer, OtherPlayer, PlayerId, SessionId, SessionView, DECK_SIZE,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedReceiver;

/// Minimum number of players required to start a game.
pub const MIN_PLAYERS: usize = 2;

/// Largest roster that still fits a one-card-per-player first round in a
/// single deck.
pub const MAX_PLAYERS: usize = DECK_SIZE as usize;

/// Tunable game parameters. `None` fields fall back to the lobby-size
/// policies below; fixed values come from CLI overrides or tests.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub round_count: Option<u32>,
    pub starting_lives: Option<u32>,
    pub starting_stars: i32,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            round_count: None,
            starting_lives: None,
            starting_stars: 1,
        }
    }
}

impl GameConfig {
    /// Fixed values regardless of lobby size.
    pub fn fixed(round_count: u32, starting_lives: u32, starting_stars: i32) -> Self {
        GameConfig {
            round_count: Some(round_count),
            starting_lives: Some(starting_lives),
            starting_stars,
        }
    }

    /// Total rounds for a lobby of `player_count`, capped so the final
    /// round still fits in one 100-card deck.
    pub fn rounds_for(&self, player_count: usize) -> u32 {
        let rounds = self.round_count.unwrap_or(match player_count {
            0..=2 => 12,
            3 => 10,
            _ => 8,
        });
        rounds.min(u32::from(DECK_SIZE) / player_count.max(1) as u32)
    }

    pub fn lives_for(&self, player_count: usize) -> u32 {
        self.starting_lives.unwrap_or(player_count as u32)
    }
}

/// Shared round state while a game is in progress. Identical for every
/// connection in the session; views differ only in how hands are reported.
#[derive(Debug)]
pub struct RoundState {
    pub round: u32,
    pub round_count: u32,
    pub hands: HashMap<PlayerId, Vec<Card>>,
    pub lives: u32,
    pub stars: i32,
    pub voting: HashSet<PlayerId>,
    pub played_cards: Vec<Card>,
    pub level_reward: LevelReward,
}

/// The single authoritative state tag shared by all of a session's players.
#[derive(Debug)]
pub enum SessionPhase {
    Lobby,
    InGame(RoundState),
    Won,
    Lost,
    PlayerLeft { player_name: String },
}

/// One game: the player roster in join order, the shared phase, and every
/// rule of the game. All mutation happens through methods called under the
/// coordinator's per-session lock; each mutating action ends by signalling
/// every connection's listeners.
pub struct Session {
    id: SessionId,
    config: GameConfig,
    connections: Vec<Connection>,
    phase: SessionPhase,
}

impl Session {
    pub fn new(id: SessionId, config: GameConfig, creator: Player) -> Self {
        info!("Session {} created by {}", id, creator.name());
        Session {
            id,
            config,
            connections: vec![Connection::new(creator)],
            phase: SessionPhase::Lobby,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn player_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn connection(&self, player_id: &PlayerId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.player().id() == player_id)
    }

    fn connection_mut(&mut self, player_id: &PlayerId) -> Option<&mut Connection> {
        self.connections
            .iter_mut()
            .find(|c| c.player().id() == player_id)
    }

    /// Appends an unready player to the roster. Only possible in the lobby,
    /// and only while the roster still fits the deck.
    pub fn join(&mut self, player: Player) -> Result<(), CoordinatorError> {
        if !matches!(self.phase, SessionPhase::Lobby) || self.connections.len() >= MAX_PLAYERS {
            return Err(CoordinatorError::InvalidState);
        }
        info!("{} joined session {}", player.name(), self.id);
        self.connections.push(Connection::new(player));
        self.notify_all();
        Ok(())
    }

    /// Toggles the player's ready flag. Marking ready may start the game.
    pub fn set_ready(&mut self, player_id: &PlayerId, ready: bool) -> Result<(), CoordinatorError> {
        if !matches!(self.phase, SessionPhase::Lobby) {
            return Err(CoordinatorError::InvalidState);
        }
        match self.connection_mut(player_id) {
            Some(connection) => connection.player_mut().set_ready(ready),
            None => return Err(CoordinatorError::NotFound),
        }
        if ready {
            self.maybe_start_game();
        }
        self.notify_all();
        Ok(())
    }

    fn maybe_start_game(&mut self) {
        let player_count = self.connections.len();
        if player_count < MIN_PLAYERS
            || !self.connections.iter().all(|c| c.player().is_ready())
        {
            return;
        }
        let mut deck = Deck::shuffled();
        let hands = self
            .connections
            .iter()
            .map(|c| (c.player().id().clone(), deck.deal(1)))
            .collect();
        self.phase = SessionPhase::InGame(RoundState {
            round: 1,
            round_count: self.config.rounds_for(player_count),
            hands,
            lives: self.config.lives_for(player_count),
            stars: self.config.starting_stars,
            voting: HashSet::new(),
            played_cards: Vec::new(),
            level_reward: LevelReward::None,
        });
        info!("Session {} started with {} players", self.id, player_count);
    }

    /// Plays the caller's lowest card. Playing over a lower card still held
    /// elsewhere is a mistake: it costs a shared life and forfeits every
    /// card below the played one.
    pub fn play_card(&mut self, player_id: &PlayerId) -> Result<(), CoordinatorError> {
        let lost = {
            let round = match &mut self.phase {
                SessionPhase::InGame(round) => round,
                _ => return Err(CoordinatorError::InvalidState),
            };
            let hand = round
                .hands
                .get_mut(player_id)
                .ok_or(CoordinatorError::NotFound)?;
            let Some(lowest_index) = lowest_card_index(hand) else {
                // Replayed action: the hand is already empty.
                warn!("{} played with an empty hand in session {}", player_id, self.id);
                return Ok(());
            };
            let removed = hand.remove(lowest_index);
            let lowest_remaining = round.hands.values().flatten().min().copied();
            let mistake = matches!(lowest_remaining, Some(lowest) if removed > lowest);

            let mut lost = false;
            let mut played = vec![removed];
            if mistake {
                round.lives = round.lives.saturating_sub(1);
                debug!(
                    "Mistake in session {}: {} played over a lower card, {} lives left",
                    self.id, player_id, round.lives
                );
                if round.lives == 0 {
                    lost = true;
                } else {
                    // Cards below the mistaken play were skipped and are forfeit.
                    for hand in round.hands.values_mut() {
                        let (forfeited, kept): (Vec<Card>, Vec<Card>) =
                            hand.drain(..).partition(|c| *c < removed);
                        *hand = kept;
                        played.extend(forfeited);
                    }
                }
            }
            if !lost {
                played.sort();
                round.played_cards.extend(played);
                round.voting.clear();
            }
            lost
        };
        if lost {
            self.phase = SessionPhase::Lost;
            info!("Session {} lost", self.id);
        } else {
            self.complete_round_if_done();
        }
        self.notify_all();
        Ok(())
    }

    /// Adds the player to the throw-star vote. Once every current player is
    /// in the set, the throw resolves: one shared star is spent and each
    /// non-empty hand discards its lowest card.
    pub fn vote_to_throw_star(&mut self, player_id: &PlayerId) -> Result<(), CoordinatorError> {
        let resolved = {
            let round = match &mut self.phase {
                SessionPhase::InGame(round) => round,
                _ => return Err(CoordinatorError::InvalidState),
            };
            if !round.hands.contains_key(player_id) {
                return Err(CoordinatorError::NotFound);
            }
            round.voting.insert(player_id.clone());
            let all_voted = self
                .connections
                .iter()
                .all(|c| round.voting.contains(c.player().id()));
            if all_voted {
                round.stars -= 1;
                let mut removed = Vec::new();
                for connection in &self.connections {
                    if let Some(hand) = round.hands.get_mut(connection.player().id()) {
                        if let Some(lowest_index) = lowest_card_index(hand) {
                            removed.push(hand.remove(lowest_index));
                        }
                    }
                }
                removed.sort();
                // Thrown cards slot in behind the last two played entries so
                // the most recent ordinary play keeps its position.
                let at = round.played_cards.len().saturating_sub(2);
                round.played_cards.splice(at..at, removed);
                round.voting.clear();
                debug!("Star thrown in session {}, {} stars left", self.id, round.stars);
            }
            all_voted
        };
        if resolved {
            self.complete_round_if_done();
        }
        self.notify_all();
        Ok(())
    }

    /// Withdraws the player's throw-star vote. Revoking a vote that was
    /// never cast is a no-op.
    pub fn revoke_vote(&mut self, player_id: &PlayerId) -> Result<(), CoordinatorError> {
        match &mut self.phase {
            SessionPhase::InGame(round) => {
                round.voting.remove(player_id);
            }
            _ => return Err(CoordinatorError::InvalidState),
        }
        self.notify_all();
        Ok(())
    }

    /// Removes the player's connection. Returns true when the session is now
    /// empty and should be destroyed by the registry.
    pub fn leave(&mut self, player_id: &PlayerId) -> Result<bool, CoordinatorError> {
        let index = self
            .connections
            .iter()
            .position(|c| c.player().id() == player_id)
            .ok_or(CoordinatorError::NotFound)?;
        let connection = self.connections.remove(index);
        let player_name = connection.player().name().to_string();
        info!("{} left session {}", player_name, self.id);

        if matches!(self.phase, SessionPhase::Lobby) {
            // The departure may leave everyone remaining ready.
            self.maybe_start_game();
        } else if matches!(self.phase, SessionPhase::InGame(_)) {
            // The game cannot continue with a missing hand.
            self.phase = SessionPhase::PlayerLeft { player_name };
        }

        self.notify_all();
        Ok(self.connections.is_empty())
    }

    /// Completes the round once every hand is empty: either the game is won
    /// or the next round is dealt and the just-finished round's milestone
    /// reward applied.
    fn complete_round_if_done(&mut self) {
        let won = {
            let round = match &mut self.phase {
                SessionPhase::InGame(round) => round,
                _ => return,
            };
            if !round.hands.values().all(|hand| hand.is_empty()) {
                return;
            }
            if round.round == round.round_count {
                true
            } else {
                let finished = round.round;
                round.round += 1;
                round.level_reward = match finished {
                    2 | 5 | 8 => {
                        round.stars += 1;
                        LevelReward::Star
                    }
                    3 | 6 | 9 => {
                        round.lives += 1;
                        LevelReward::Life
                    }
                    _ => LevelReward::None,
                };
                let per_player = round.round as usize;
                let mut deck = Deck::shuffled();
                for connection in &self.connections {
                    round
                        .hands
                        .insert(connection.player().id().clone(), deck.deal(per_player));
                }
                round.played_cards.clear();
                round.voting.clear();
                debug!("Session {} advanced to round {}", self.id, round.round);
                false
            }
        };
        if won {
            self.phase = SessionPhase::Won;
            info!("Session {} won", self.id);
        }
    }

    /// Current state as seen by this player: own hand in full (sorted),
    /// everyone else as card counts.
    pub fn view(&self, player_id: &PlayerId) -> Option<SessionView> {
        let connection = self.connection(player_id)?;
        let view = match &self.phase {
            SessionPhase::Lobby => SessionView::InLobby {
                session_id: self.id.as_str().to_string(),
                players: self
                    .connections
                    .iter()
                    .map(|c| LobbyPlayer {
                        name: c.player().name().to_string(),
                        is_ready: c.player().is_ready(),
                    })
                    .collect(),
                is_ready: connection.player().is_ready(),
            },
            SessionPhase::InGame(round) => {
                let mut hand = round.hands.get(player_id).cloned().unwrap_or_default();
                hand.sort();
                let others = self
                    .connections
                    .iter()
                    .filter(|c| c.player().id() != player_id)
                    .map(|c| OtherPlayer {
                        name: c.player().name().to_string(),
                        card_count: round.hands.get(c.player().id()).map_or(0, Vec::len),
                        is_voting: round.voting.contains(c.player().id()),
                    })
                    .collect();
                SessionView::InGame {
                    round: round.round,
                    round_count: round.round_count,
                    hand,
                    others,
                    lives: round.lives,
                    stars: round.stars,
                    played_cards: round.played_cards.clone(),
                    level_reward: round.level_reward,
                    is_voting: round.voting.contains(player_id),
                }
            }
            SessionPhase::Won => SessionView::Won,
            SessionPhase::Lost => SessionView::Lost,
            SessionPhase::PlayerLeft { player_name } => SessionView::PlayerLeft {
                player_name: player_name.clone(),
            },
        };
        Some(view)
    }

    /// Registers an update listener on the player's connection.
    pub fn subscribe(&mut self, player_id: &PlayerId) -> Option<(u64, UnboundedReceiver<()>)> {
        self.connection_mut(player_id).map(Connection::subscribe)
    }

    /// Removes a listener. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, player_id: &PlayerId, listener_id: u64) {
        if let Some(connection) = self.connection_mut(player_id) {
            connection.unsubscribe(listener_id);
        }
    }

    fn notify_all(&mut self) {
        for connection in &mut self.connections {
            connection.notify();
        }
    }
}

fn lowest_card_index(hand: &[Card]) -> Option<usize> {
    hand.iter()
        .enumerate()
        .min_by_key(|(_, card)| **card)
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(player_count: usize, config: GameConfig) -> (Session, Vec<PlayerId>) {
        let creator = Player::new("player0");
        let mut ids = vec![creator.id().clone()];
        let mut session = Session::new(SessionId::new("AB"), config, creator);
        for i in 1..player_count {
            let player = Player::new(format!("player{}", i));
            ids.push(player.id().clone());
            session.join(player).unwrap();
        }
        (session, ids)
    }

    fn started(player_count: usize, config: GameConfig) -> (Session, Vec<PlayerId>) {
        let (mut session, ids) = lobby(player_count, config);
        for id in &ids {
            session.set_ready(id, true).unwrap();
        }
        assert!(matches!(session.phase(), SessionPhase::InGame(_)));
        (session, ids)
    }

    fn round_state(session: &Session) -> &RoundState {
        match session.phase() {
            SessionPhase::InGame(round) => round,
            other => panic!("expected InGame, got {:?}", other),
        }
    }

    fn hand(session: &Session, player_id: &PlayerId) -> Vec<Card> {
        round_state(session).hands[player_id].clone()
    }

    /// Id of the player currently holding the globally lowest card.
    fn lowest_holder(session: &Session, ids: &[PlayerId]) -> PlayerId {
        ids.iter()
            .filter(|id| !hand(session, id).is_empty())
            .min_by_key(|id| hand(session, id).into_iter().min().unwrap())
            .unwrap()
            .clone()
    }

    /// Multiset of all cards in hands plus played cards.
    fn all_cards(session: &Session) -> Vec<Card> {
        let round = round_state(session);
        let mut cards: Vec<Card> = round.hands.values().flatten().copied().collect();
        cards.extend(round.played_cards.iter().copied());
        cards.sort();
        cards
    }

    fn inject_round(
        session: &mut Session,
        ids: &[PlayerId],
        hands: Vec<Vec<u8>>,
        round: u32,
        round_count: u32,
        lives: u32,
        stars: i32,
    ) {
        let hands: HashMap<PlayerId, Vec<Card>> = ids
            .iter()
            .cloned()
            .zip(hands.into_iter().map(|h| h.into_iter().map(Card::new).collect()))
            .collect();
        session.phase = SessionPhase::InGame(RoundState {
            round,
            round_count,
            hands,
            lives,
            stars,
            voting: HashSet::new(),
            played_cards: Vec::new(),
            level_reward: LevelReward::None,
        });
    }

    #[test]
    fn test_single_ready_player_does_not_start() {
        let (mut session, ids) = lobby(1, GameConfig::default());
        session.set_ready(&ids[0], true).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lobby));
    }

    #[test]
    fn test_all_ready_starts_game() {
        let (mut session, ids) = lobby(2, GameConfig::default());
        session.set_ready(&ids[0], true).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lobby));
        session.set_ready(&ids[1], true).unwrap();
        assert!(matches!(session.phase(), SessionPhase::InGame(_)));
    }

    #[test]
    fn test_unready_blocks_start() {
        let (mut session, ids) = lobby(2, GameConfig::default());
        session.set_ready(&ids[0], true).unwrap();
        session.set_ready(&ids[0], false).unwrap();
        session.set_ready(&ids[1], true).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lobby));

        session.set_ready(&ids[0], true).unwrap();
        assert!(matches!(session.phase(), SessionPhase::InGame(_)));
    }

    #[test]
    fn test_round_one_deals_one_card_each() {
        let (session, ids) = started(3, GameConfig::default());
        for id in &ids {
            assert_eq!(hand(&session, id).len(), 1);
        }
        let round = round_state(&session);
        assert_eq!(round.round, 1);
        assert_eq!(round.lives, 3);
        assert_eq!(round.stars, 1);
        assert_eq!(round.round_count, 10);
        assert!(round.played_cards.is_empty());
    }

    #[test]
    fn test_round_count_policy_by_lobby_size() {
        let config = GameConfig::default();
        assert_eq!(config.rounds_for(2), 12);
        assert_eq!(config.rounds_for(3), 10);
        assert_eq!(config.rounds_for(4), 8);
        assert_eq!(config.rounds_for(7), 8);
        // Capped so the final round fits in one deck.
        assert_eq!(config.rounds_for(13), 7);
    }

    #[test]
    fn test_join_after_start_rejected() {
        let (mut session, _) = started(2, GameConfig::default());
        let result = session.join(Player::new("late"));
        assert_eq!(result, Err(CoordinatorError::InvalidState));
    }

    #[test]
    fn test_roster_capped_at_deck_size() {
        let (mut session, ids) = lobby(MAX_PLAYERS, GameConfig::default());
        assert_eq!(
            session.join(Player::new("overflow")),
            Err(CoordinatorError::InvalidState)
        );
        assert_eq!(session.player_count(), MAX_PLAYERS);

        // A full lobby readying up still deals within the deck: one card
        // each, single round.
        for id in &ids {
            session.set_ready(id, true).unwrap();
        }
        let round = round_state(&session);
        assert_eq!(round.round_count, 1);
        assert!(round.hands.values().all(|hand| hand.len() == 1));
    }

    #[test]
    fn test_play_card_in_lobby_rejected() {
        let (mut session, ids) = lobby(2, GameConfig::default());
        assert_eq!(
            session.play_card(&ids[0]),
            Err(CoordinatorError::InvalidState)
        );
        assert_eq!(
            session.vote_to_throw_star(&ids[0]),
            Err(CoordinatorError::InvalidState)
        );
    }

    #[test]
    fn test_cards_unique_across_hands() {
        let (mut session, ids) = started(4, GameConfig::fixed(3, 10, 0));
        // Play the whole game in order; before every play, the dealt cards
        // must be duplicate-free.
        while matches!(session.phase(), SessionPhase::InGame(_)) {
            let dealt = all_cards(&session);
            let unique: HashSet<Card> = dealt.iter().copied().collect();
            assert_eq!(unique.len(), dealt.len());
            let player = lowest_holder(&session, &ids);
            session.play_card(&player).unwrap();
        }
        assert!(matches!(session.phase(), SessionPhase::Won));
    }

    #[test]
    fn test_card_conservation_through_mistakes() {
        let (mut session, ids) = started(3, GameConfig::fixed(4, 100, 0));
        let mut turn = 0;
        while matches!(session.phase(), SessionPhase::InGame(_)) {
            let dealt = all_cards(&session);
            // Rotate through players so some plays are mistakes.
            let player = ids[turn % ids.len()].clone();
            turn += 1;
            if hand(&session, &player).is_empty() {
                continue;
            }
            session.play_card(&player).unwrap();
            if matches!(session.phase(), SessionPhase::InGame(_)) {
                let round = round_state(&session);
                if round.played_cards.is_empty() {
                    continue; // round rolled over, fresh deal
                }
                assert_eq!(all_cards(&session), dealt);
            }
            assert!(turn < 1000, "game did not terminate");
        }
        assert!(matches!(session.phase(), SessionPhase::Won));
    }

    #[test]
    fn test_playing_in_order_wins() {
        let (mut session, ids) = started(3, GameConfig::fixed(1, 1, 0));
        for _ in 0..3 {
            let player = lowest_holder(&session, &ids);
            session.play_card(&player).unwrap();
        }
        assert!(matches!(session.phase(), SessionPhase::Won));
        for id in &ids {
            assert_eq!(session.view(id), Some(SessionView::Won));
        }
    }

    #[test]
    fn test_playing_out_of_order_loses() {
        let (mut session, ids) = started(3, GameConfig::fixed(1, 1, 0));
        let lowest = lowest_holder(&session, &ids);
        let wrong = ids.iter().find(|id| **id != lowest).unwrap().clone();
        session.play_card(&wrong).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lost));
        for id in &ids {
            assert_eq!(session.view(id), Some(SessionView::Lost));
        }
    }

    #[test]
    fn test_mistake_decrements_lives_and_purges() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![40, 70], vec![10, 20, 60]],
            2,
            12,
            3,
            1,
        );

        // Player 0 plays 40 while 10 and 20 are still out there.
        session.play_card(&ids[0]).unwrap();

        let round = round_state(&session);
        assert_eq!(round.lives, 2);
        assert_eq!(hand(&session, &ids[0]), vec![Card::new(70)]);
        assert_eq!(hand(&session, &ids[1]), vec![Card::new(60)]);
        // Forfeited cards plus the played one, ascending.
        assert_eq!(
            round.played_cards,
            vec![Card::new(10), Card::new(20), Card::new(40)]
        );
    }

    #[test]
    fn test_correct_play_appends_single_card() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(&mut session, &ids, vec![vec![5, 50], vec![30]], 2, 12, 3, 1);

        session.play_card(&ids[0]).unwrap();

        let round = round_state(&session);
        assert_eq!(round.lives, 3);
        assert_eq!(round.played_cards, vec![Card::new(5)]);
    }

    #[test]
    fn test_losing_mistake_stops_before_purge() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(&mut session, &ids, vec![vec![40], vec![10, 20]], 2, 12, 1, 1);

        session.play_card(&ids[0]).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lost));
    }

    #[test]
    fn test_play_clears_votes() {
        let (mut session, ids) = started(3, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![5], vec![30], vec![60]],
            2,
            12,
            3,
            1,
        );
        session.vote_to_throw_star(&ids[1]).unwrap();
        assert_eq!(round_state(&session).voting.len(), 1);

        session.play_card(&ids[0]).unwrap();
        assert!(round_state(&session).voting.is_empty());
    }

    #[test]
    fn test_vote_requires_consensus() {
        let (mut session, ids) = started(3, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![5], vec![30], vec![60]],
            2,
            12,
            3,
            2,
        );

        session.vote_to_throw_star(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[1]).unwrap();
        // A single non-voter blocks resolution.
        let round = round_state(&session);
        assert_eq!(round.stars, 2);
        assert_eq!(round.voting.len(), 2);

        session.vote_to_throw_star(&ids[2]).unwrap();
        let round = round_state(&session);
        assert_eq!(round.stars, 1);
        assert!(round.voting.is_empty());
        assert!(round.hands.values().all(Vec::is_empty));
    }

    #[test]
    fn test_duplicate_vote_is_noop() {
        let (mut session, ids) = started(3, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![5], vec![30], vec![60]],
            2,
            12,
            3,
            2,
        );

        session.vote_to_throw_star(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[0]).unwrap();
        let round = round_state(&session);
        assert_eq!(round.voting.len(), 1);
        assert_eq!(round.stars, 2);
    }

    #[test]
    fn test_revoke_vote() {
        let (mut session, ids) = started(3, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![5], vec![30], vec![60]],
            2,
            12,
            3,
            2,
        );

        session.vote_to_throw_star(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[1]).unwrap();
        session.revoke_vote(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[2]).unwrap();
        // Revoked vote keeps the throw from resolving.
        let round = round_state(&session);
        assert_eq!(round.stars, 2);
        assert_eq!(round.voting.len(), 2);

        // Revoking an absent vote is tolerated.
        session.revoke_vote(&ids[0]).unwrap();
        assert_eq!(round_state(&session).voting.len(), 2);
    }

    #[test]
    fn test_star_throw_discards_lowest_from_each_hand() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![15, 80], vec![25, 90]],
            3,
            12,
            3,
            2,
        );

        session.vote_to_throw_star(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[1]).unwrap();

        let round = round_state(&session);
        assert_eq!(round.stars, 1);
        assert_eq!(hand(&session, &ids[0]), vec![Card::new(80)]);
        assert_eq!(hand(&session, &ids[1]), vec![Card::new(90)]);
        assert_eq!(round.played_cards, vec![Card::new(15), Card::new(25)]);
    }

    #[test]
    fn test_star_throw_inserts_behind_last_two_played() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![5, 15, 80], vec![10, 25, 90]],
            3,
            12,
            3,
            2,
        );
        // Build up played history: 5, 10.
        session.play_card(&ids[0]).unwrap();
        session.play_card(&ids[1]).unwrap();
        assert_eq!(
            round_state(&session).played_cards,
            vec![Card::new(5), Card::new(10)]
        );

        session.vote_to_throw_star(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[1]).unwrap();

        // Thrown cards land two positions before the end.
        assert_eq!(
            round_state(&session).played_cards,
            vec![Card::new(15), Card::new(25), Card::new(5), Card::new(10)]
        );
    }

    #[test]
    fn test_star_throw_skips_empty_hands() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(&mut session, &ids, vec![vec![], vec![25, 90]], 3, 12, 3, 1);

        session.vote_to_throw_star(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[1]).unwrap();

        let round = round_state(&session);
        assert_eq!(round.stars, 0);
        assert_eq!(hand(&session, &ids[1]), vec![Card::new(90)]);
        assert_eq!(round.played_cards, vec![Card::new(25)]);
    }

    #[test]
    fn test_reward_schedule() {
        // (finished round, expected reward, stars delta, lives delta)
        let cases = [
            (1, LevelReward::None, 0, 0),
            (2, LevelReward::Star, 1, 0),
            (3, LevelReward::Life, 0, 1),
            (4, LevelReward::None, 0, 0),
            (5, LevelReward::Star, 1, 0),
            (6, LevelReward::Life, 0, 1),
            (7, LevelReward::None, 0, 0),
            (8, LevelReward::Star, 1, 0),
            (9, LevelReward::Life, 0, 1),
            (10, LevelReward::None, 0, 0),
        ];
        for (finished, reward, stars_delta, lives_delta) in cases {
            let (mut session, ids) = started(2, GameConfig::default());
            inject_round(&mut session, &ids, vec![vec![7], vec![]], finished, 12, 4, 1);
            session.play_card(&ids[0]).unwrap();

            let round = round_state(&session);
            assert_eq!(round.round, finished + 1);
            assert_eq!(round.level_reward, reward, "finished round {}", finished);
            assert_eq!(round.stars, 1 + stars_delta);
            assert_eq!(round.lives, 4 + lives_delta);
            // Fresh deal: one more card per player, empty played pile.
            assert!(round.played_cards.is_empty());
            for id in &ids {
                assert_eq!(hand(&session, id).len(), (finished + 1) as usize);
            }
        }
    }

    #[test]
    fn test_finishing_last_round_wins() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(&mut session, &ids, vec![vec![7], vec![]], 12, 12, 4, 1);
        session.play_card(&ids[0]).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Won));
    }

    #[test]
    fn test_star_throw_can_complete_round() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(&mut session, &ids, vec![vec![15], vec![25]], 2, 12, 3, 1);

        session.vote_to_throw_star(&ids[0]).unwrap();
        session.vote_to_throw_star(&ids[1]).unwrap();

        // Hands emptied by the throw, round 2 finished: star spent, star earned.
        let round = round_state(&session);
        assert_eq!(round.round, 3);
        assert_eq!(round.stars, 1);
        assert_eq!(round.level_reward, LevelReward::Star);
    }

    #[test]
    fn test_play_with_empty_hand_is_noop() {
        let (mut session, ids) = started(2, GameConfig::default());
        inject_round(&mut session, &ids, vec![vec![], vec![25, 90]], 3, 12, 3, 1);

        session.play_card(&ids[0]).unwrap();
        let round = round_state(&session);
        assert_eq!(round.lives, 3);
        assert!(round.played_cards.is_empty());
        assert_eq!(hand(&session, &ids[1]).len(), 2);
    }

    #[test]
    fn test_leave_in_lobby_removes_from_roster() {
        let (mut session, ids) = lobby(3, GameConfig::default());
        let empty = session.leave(&ids[2]).unwrap();
        assert!(!empty);
        assert_eq!(session.player_count(), 2);
        match session.view(&ids[0]) {
            Some(SessionView::InLobby { players, .. }) => {
                assert_eq!(players.len(), 2);
                assert!(players.iter().all(|p| p.name != "player2"));
            }
            other => panic!("expected lobby view, got {:?}", other),
        }
    }

    #[test]
    fn test_leave_may_trigger_game_start() {
        let (mut session, ids) = lobby(3, GameConfig::default());
        session.set_ready(&ids[0], true).unwrap();
        session.set_ready(&ids[1], true).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lobby));

        // The unready player leaves; everyone remaining is ready.
        session.leave(&ids[2]).unwrap();
        assert!(matches!(session.phase(), SessionPhase::InGame(_)));
        assert_eq!(round_state(&session).hands.len(), 2);
    }

    #[test]
    fn test_leave_during_game_ends_for_others() {
        for player_count in 2..=4 {
            let (mut session, ids) = started(player_count, GameConfig::default());
            session.leave(&ids[0]).unwrap();
            for id in &ids[1..] {
                assert_eq!(
                    session.view(id),
                    Some(SessionView::PlayerLeft {
                        player_name: "player0".to_string()
                    })
                );
            }
            assert_eq!(session.view(&ids[0]), None);
        }
    }

    #[test]
    fn test_leave_after_game_over_keeps_phase() {
        let (mut session, ids) = started(3, GameConfig::fixed(1, 1, 0));
        let lowest = lowest_holder(&session, &ids);
        let wrong = ids.iter().find(|id| **id != lowest).unwrap().clone();
        session.play_card(&wrong).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lost));

        session.leave(&ids[0]).unwrap();
        assert!(matches!(session.phase(), SessionPhase::Lost));
    }

    #[test]
    fn test_last_leave_empties_session() {
        let (mut session, ids) = lobby(2, GameConfig::default());
        assert!(!session.leave(&ids[0]).unwrap());
        assert!(session.leave(&ids[1]).unwrap());
        assert!(session.is_empty());
    }

    #[test]
    fn test_view_is_player_relative() {
        let (mut session, ids) = started(3, GameConfig::default());
        inject_round(
            &mut session,
            &ids,
            vec![vec![50, 5], vec![30, 60], vec![90]],
            2,
            10,
            3,
            1,
        );
        session.vote_to_throw_star(&ids[1]).unwrap();

        match session.view(&ids[0]) {
            Some(SessionView::InGame {
                hand,
                others,
                is_voting,
                ..
            }) => {
                // Own hand sorted, self excluded from others.
                assert_eq!(hand, vec![Card::new(5), Card::new(50)]);
                assert_eq!(others.len(), 2);
                assert_eq!(others[0].name, "player1");
                assert_eq!(others[0].card_count, 2);
                assert!(others[0].is_voting);
                assert_eq!(others[1].name, "player2");
                assert_eq!(others[1].card_count, 1);
                assert!(!others[1].is_voting);
                assert!(!is_voting);
            }
            other => panic!("expected in-game view, got {:?}", other),
        }
    }

    #[test]
    fn test_actions_notify_all_listeners() {
        let (mut session, ids) = lobby(2, GameConfig::default());
        let (_, mut updates0) = session.subscribe(&ids[0]).unwrap();
        let (listener1, mut updates1) = session.subscribe(&ids[1]).unwrap();

        session.set_ready(&ids[0], true).unwrap();
        assert!(updates0.try_recv().is_ok());
        assert!(updates1.try_recv().is_ok());

        session.unsubscribe(&ids[1], listener1);
        session.set_ready(&ids[1], true).unwrap();
        assert!(updates0.try_recv().is_ok());
        assert!(updates1.try_recv().is_err());
    }

    #[test]
    fn test_unknown_player_rejected() {
        let (mut session, _) = started(2, GameConfig::default());
        let stranger = PlayerId::new("nobody");
        assert_eq!(
            session.play_card(&stranger),
            Err(CoordinatorError::NotFound)
        );
        assert_eq!(session.leave(&stranger), Err(CoordinatorError::NotFound));
        assert_eq!(session.view(&stranger), None);
    }
}
