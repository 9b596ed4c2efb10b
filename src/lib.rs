//! First-blood poller: mirrors competition solve events into a Discord
//! channel as one leaderboard embed plus a short feed of announcements.

pub mod chat;
pub mod config;
pub mod driver;
pub mod event;
pub mod fetcher;
pub mod present;
pub mod reconcile;
pub mod store;
