//! Audio engine seam
//!
//! The transport drives an [`AudioEngine`] and hears back through
//! [`EngineEvent`]s. Every prepare request carries a [`SessionId`] so events
//! from a superseded request can be told apart and dropped.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::decoder::DecoderError;
use crate::output::OutputError;


/// Errors reported by an engine.
#[derive( Debug, Error )]
pub enum EngineError {
    #[error( "{0}" )]
    Decoder( #[from] DecoderError ),

    #[error( "{0}" )]
    Output( #[from] OutputError ),

    #[error( "Resampler error: {0}" )]
    Resample( String ),

    #[error( "Failed to spawn decode thread: {0}" )]
    Spawn( #[from] std::io::Error ),

    #[error( "No prepared track to start" )]
    NotPrepared,

    #[error( "Nothing is playing" )]
    NotPlaying,
}


/// Identity of one prepare request.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default )]
pub struct SessionId( u64 );


impl SessionId {
    /// Returns the id that follows this one.
    pub fn next( self ) -> Self {
        Self( self.0 + 1 )
    }
}


impl fmt::Display for SessionId {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "#{}", self.0 )
    }
}


/// Asynchronous notifications from the engine.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum EngineEvent {
    /// The source is decoded far enough to start.
    Ready { session: SessionId },
    /// Playback reached the end of the source.
    Finished { session: SessionId },
    /// The source was rejected or failed mid-playback.
    Error { session: SessionId, reason: String },
}


impl EngineEvent {
    pub fn session( &self ) -> SessionId {
        match self {
            EngineEvent::Ready { session }
            | EngineEvent::Finished { session }
            | EngineEvent::Error { session, .. } => *session,
        }
    }
}


/// Channel the engine uses to report back. Safe to use from any thread.
pub type EngineEvents = UnboundedSender<EngineEvent>;


/// Decode/output device driven by the transport.
///
/// Implementations own all decode and output resources. `prepare` must not
/// block: readiness or failure is reported later through [`EngineEvents`].
pub trait AudioEngine {
    /// Drops any prepared or playing source.
    fn reset( &mut self );

    /// Starts preparing `path` in the background.
    fn prepare( &mut self, session: SessionId, path: &Path );

    /// Starts output of the prepared source.
    fn start( &mut self ) -> Result<(), EngineError>;

    fn pause( &mut self ) -> Result<(), EngineError>;

    fn resume( &mut self ) -> Result<(), EngineError>;

    fn seek_to( &mut self, position: Duration ) -> Result<(), EngineError>;

    /// Current playback position; zero when nothing is loaded.
    fn position( &self ) -> Duration;

    /// Total length of the loaded source, when known.
    fn duration( &self ) -> Option<Duration>;
}
