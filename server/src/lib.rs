//! Authoritative session coordinator for a cooperative card game.
//!
//! Players share a hand of unique cards and must play them in ascending
//! order without communicating. The server owns all game state: clients
//! send actions and receive fresh per-player views after every change.

pub mod connection;
pub mod coordinator;
pub mod deck;
pub mod error;
pub mod game;
pub mod network;
pub mod session_id;
