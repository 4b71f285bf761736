//! Session registry and action routing.
//!
//! The coordinator owns every live session behind a `RwLock`ed registry and
//! routes player-scoped actions to the right session. Each session sits in an
//! `Arc<Mutex<_>>` of its own so actions on different sessions never contend.
//!
//! Lock ordering: the registry lock is never held while a session lock is
//! being acquired. A session lock may be held while taking the registry write
//! lock (the destroy-on-last-leave path), which keeps the two orderings
//! acyclic.

use crate::connection::Player;
use crate::error::CoordinatorError;
use crate::game::{GameConfig, Session};
use crate::session_id::SessionIdGenerator;
use log::{info, warn};
use shared::{Action, PlayerId, SessionId, SessionView};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::mpsc::UnboundedReceiver;

struct Registry {
    /// Sessions keyed by normalized (uppercase) id.
    sessions: HashMap<String, Arc<Mutex<Session>>>,
    /// Player ids to the normalized id of the session holding their connection.
    players: HashMap<PlayerId, String>,
}

pub struct Coordinator {
    config: GameConfig,
    ids: SessionIdGenerator,
    registry: RwLock<Registry>,
}

impl Coordinator {
    pub fn new(config: GameConfig) -> Self {
        Coordinator {
            config,
            ids: SessionIdGenerator::new(),
            registry: RwLock::new(Registry {
                sessions: HashMap::new(),
                players: HashMap::new(),
            }),
        }
    }

    /// Creates a session with the caller as its first (unready) player.
    pub fn create_session(&self, player_name: &str) -> (PlayerId, SessionId) {
        let session_id = self.ids.next_id();
        let player = Player::new(player_name);
        let player_id = player.id().clone();
        let session = Session::new(session_id.clone(), self.config.clone(), player);

        let mut registry = self.registry.write().unwrap();
        registry
            .sessions
            .insert(session_id.normalized(), Arc::new(Mutex::new(session)));
        registry
            .players
            .insert(player_id.clone(), session_id.normalized());
        (player_id, session_id)
    }

    /// Joins an existing session by id, case-insensitively. Fails if the id
    /// is unknown or the game has already started.
    pub fn join_session(
        &self,
        session_id: &str,
        player_name: &str,
    ) -> Result<(PlayerId, SessionId), CoordinatorError> {
        let key = SessionId::new(session_id).normalized();
        let session = self.lookup(&key)?;
        let player = Player::new(player_name);
        let player_id = player.id().clone();

        let mut session = session.lock().unwrap();
        // A session emptied by its last leave is unregistered under its own
        // lock, so an empty session here is one mid-destruction.
        if session.is_empty() {
            return Err(CoordinatorError::NotFound);
        }
        session.join(player)?;
        let canonical = session.id().clone();
        self.registry
            .write()
            .unwrap()
            .players
            .insert(player_id.clone(), key);
        Ok((player_id, canonical))
    }

    /// Resolves a previously issued player id back to its session, letting a
    /// client re-attach after a dropped transport.
    pub fn session_id_of(&self, player_id: &PlayerId) -> Result<SessionId, CoordinatorError> {
        let session = self.session_of(player_id)?;
        let session = session.lock().unwrap();
        Ok(session.id().clone())
    }

    pub fn view(&self, player_id: &PlayerId) -> Result<SessionView, CoordinatorError> {
        let session = self.session_of(player_id)?;
        let session = session.lock().unwrap();
        session.view(player_id).ok_or(CoordinatorError::NotFound)
    }

    /// Registers an update listener for the player. The subscription removes
    /// itself from the session when dropped.
    pub fn subscribe(&self, player_id: &PlayerId) -> Result<Subscription, CoordinatorError> {
        let session = self.session_of(player_id)?;
        let (listener_id, receiver) = {
            let mut session = session.lock().unwrap();
            session
                .subscribe(player_id)
                .ok_or(CoordinatorError::NotFound)?
        };
        Ok(Subscription {
            session: Arc::downgrade(&session),
            player_id: player_id.clone(),
            listener_id,
            receiver,
        })
    }

    /// Applies a player action to their session under that session's lock.
    pub fn apply(&self, player_id: &PlayerId, action: Action) -> Result<(), CoordinatorError> {
        match action {
            Action::SetReady { ready } => self
                .session_of(player_id)?
                .lock()
                .unwrap()
                .set_ready(player_id, ready),
            Action::PlayCard => self.session_of(player_id)?.lock().unwrap().play_card(player_id),
            Action::VoteToThrowStar => self
                .session_of(player_id)?
                .lock()
                .unwrap()
                .vote_to_throw_star(player_id),
            Action::RevokeVote => self
                .session_of(player_id)?
                .lock()
                .unwrap()
                .revoke_vote(player_id),
            Action::Leave => self.leave(player_id),
        }
    }

    /// Removes the player from their session, destroying the session when
    /// its last player leaves.
    pub fn leave(&self, player_id: &PlayerId) -> Result<(), CoordinatorError> {
        let session = self.session_of(player_id)?;
        let mut session = session.lock().unwrap();
        let now_empty = session.leave(player_id)?;

        let mut registry = self.registry.write().unwrap();
        registry.players.remove(player_id);
        if now_empty {
            let key = session.id().normalized();
            registry.sessions.remove(&key);
            info!("Session {} destroyed", session.id());
        }
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().unwrap().sessions.len()
    }

    fn lookup(&self, key: &str) -> Result<Arc<Mutex<Session>>, CoordinatorError> {
        self.registry
            .read()
            .unwrap()
            .sessions
            .get(key)
            .cloned()
            .ok_or(CoordinatorError::NotFound)
    }

    fn session_of(&self, player_id: &PlayerId) -> Result<Arc<Mutex<Session>>, CoordinatorError> {
        let registry = self.registry.read().unwrap();
        let key = registry
            .players
            .get(player_id)
            .ok_or(CoordinatorError::NotFound)?;
        registry
            .sessions
            .get(key)
            .cloned()
            .ok_or(CoordinatorError::NotFound)
    }
}

/// A live update listener on one player's connection.
///
/// Holds only a weak reference to the session so a subscription outliving its
/// destroyed session is harmless; dropping it unregisters the listener.
pub struct Subscription {
    session: Weak<Mutex<Session>>,
    player_id: PlayerId,
    listener_id: u64,
    receiver: UnboundedReceiver<()>,
}

impl Subscription {
    /// Waits for the next change signal. Returns `None` once the session is
    /// gone and no signals remain.
    pub async fn changed(&mut self) -> Option<()> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            match session.lock() {
                Ok(mut session) => session.unsubscribe(&self.player_id, self.listener_id),
                Err(poisoned) => warn!("Session lock poisoned during unsubscribe: {}", poisoned),
            }
        }
    }
}
