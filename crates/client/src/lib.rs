#![deny(unsafe_code)]

/// Terminal chat client for a relaychat relay.
///
/// The session keeps one transcript, streams replies from the relay into it, and
/// persists every change to a local key-value store.
pub mod app;
/// Chat domain: messages, transcript, conversations, transport and session.
pub mod chat;
/// Client settings loaded through figment.
pub mod settings;
