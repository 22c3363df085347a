//! Client-side conversation sync engine for `SenseChat`
//!
//! Outgoing text runs through a remote embed, deliver and render pipeline;
//! incoming text arrives over a realtime channel. The [`engine::SyncEngine`]
//! keeps per-conversation ledgers of both, reconciles them with server
//! history, and publishes immutable snapshots for a renderer to draw.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod ledger;
pub mod message;
pub mod persist;
pub mod realtime;
pub mod remote;

pub use config::{ClientConfig, RollbackPolicy};
pub use engine::{EngineError, PipelineStep, SyncEngine, ViewSnapshot};
pub use ledger::{Ledger, LedgerSnapshot};
pub use message::{ConversationKey, Message, MessageStatus, MessageType, User};
