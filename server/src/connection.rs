//! Per-player connection state and update subscriptions.

use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::PlayerId;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A player's identity within a session.
#[derive(Debug, Clone)]
pub struct Player {
    id: PlayerId,
    name: String,
    ready: bool,
}

impl Player {
    /// Creates an unready player with a fresh opaque id.
    pub fn new(name: impl Into<String>) -> Self {
        Player {
            id: generate_player_id(),
            name: name.into(),
            ready: false,
        }
    }

    pub fn id(&self) -> &PlayerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }
}

fn generate_player_id() -> PlayerId {
    let id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    PlayerId::new(id)
}

/// One player's live handle into a session.
///
/// The connection stays in the session until the player leaves, surviving
/// client disconnects; update listeners come and go with each transport
/// attachment. Listeners are signalled with no payload — subscribers read
/// the freshly published state themselves.
#[derive(Debug)]
pub struct Connection {
    player: Player,
    listeners: HashMap<u64, UnboundedSender<()>>,
    next_listener_id: u64,
}

impl Connection {
    pub fn new(player: Player) -> Self {
        Connection {
            player,
            listeners: HashMap::new(),
            next_listener_id: 0,
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    /// Registers an update listener. The returned id removes it again via
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&mut self) -> (u64, UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener_id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.insert(listener_id, tx);
        (listener_id, rx)
    }

    pub fn unsubscribe(&mut self, listener_id: u64) {
        self.listeners.remove(&listener_id);
    }

    /// Signals every listener that session state changed. Listeners whose
    /// receiving side is gone are pruned.
    pub fn notify(&mut self) {
        self.listeners.retain(|_, tx| tx.send(()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
