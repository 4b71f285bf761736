//! Shuffled card deck for one round of dealing.

use rand::seq::SliceRandom;
use shared::{Card, DECK_SIZE};

/// A random permutation of the values `1..=100`, consumed once and never
/// restarted. One deck is shared across all players within a round so no
/// value repeats.
pub struct Deck {
    cards: std::vec::IntoIter<Card>,
}

impl Deck {
    pub fn shuffled() -> Self {
        let mut cards: Vec<Card> = (1..=DECK_SIZE).map(Card::new).collect();
        cards.shuffle(&mut rand::thread_rng());
        Deck {
            cards: cards.into_iter(),
        }
    }

    /// Draws the next `count` cards.
    ///
    /// Panics if the deck runs dry. That can only happen when round size
    /// times player count exceeds 100, which the round-count policy rules
    /// out; hitting it indicates a configuration bug.
    pub fn deal(&mut self, count: usize) -> Vec<Card> {
        assert!(
            count <= self.remaining(),
            "deck exhausted: requested {} cards with {} remaining",
            count,
            self.remaining()
        );
        self.cards.by_ref().take(count).collect()
    }

    pub fn remaining(&self) -> usize {
        self.cards.len()
    }
}
