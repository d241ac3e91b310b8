//! Cadenza Core - Playback sequencing and transport
//!
//! This crate provides the library catalog, the shuffle/repeat queue, the
//! transport state machine and the player service that runs it against an
//! audio engine. The production engine decodes with symphonia and plays
//! through cpal.

pub mod backend;
pub mod catalog;
pub mod command;
pub mod decoder;
pub mod engine;
pub mod notifier;
pub mod output;
pub mod queue;
pub mod service;
pub mod transport;

pub use backend::SymphoniaEngine;
pub use catalog::{ Catalog, CatalogError, CatalogProvider, DirectoryCatalog, TrackId, TrackRecord };
pub use command::{ Command, CommandError };
pub use engine::{ AudioEngine, EngineError, EngineEvent, EngineEvents, SessionId };
pub use notifier::{ format_time, NotifierEvent, PlaybackStatus, Progress };
pub use queue::{ AdvanceReason, PlaybackMode, QueueModel, QueueState, RepeatMode };
pub use service::{ PlayerConfig, PlayerHandle, PlayerService, ServiceError };
pub use transport::{ Effect, Input, TransportController, TransportState };
