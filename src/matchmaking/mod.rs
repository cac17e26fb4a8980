//! Lobby fill: first come, first seated

pub mod lobby;

pub use lobby::Lobby;
