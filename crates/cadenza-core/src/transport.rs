//! Transport controller
//!
//! A reducer over commands and engine events. It owns the queue and the
//! transport state, and answers every input with the [`Effect`]s the caller
//! must carry out against the engine and the presentation layer. It never
//! touches an engine itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{ Catalog, TrackId, TrackRecord };
use crate::command::Command;
use crate::engine::{ EngineEvent, SessionId };
use crate::notifier::{ self, NotifierEvent, Progress };
use crate::queue::{ AdvanceReason, PlaybackMode, QueueModel };


/// Reason reported when a prepare deadline passes.
pub const PREPARE_TIMEOUT_REASON: &str = "timed out preparing track";


/// Playback state of the transport.
#[derive( Debug, Clone, PartialEq, Default )]
pub enum TransportState {
    #[default]
    Idle,
    Preparing( Arc<TrackRecord> ),
    Playing( Arc<TrackRecord> ),
    Paused( Arc<TrackRecord> ),
    Error { track: Arc<TrackRecord>, reason: String },
}


impl TransportState {
    /// Track the state refers to, if any.
    pub fn track( &self ) -> Option<&Arc<TrackRecord>> {
        match self {
            TransportState::Idle => None,
            TransportState::Preparing( t )
            | TransportState::Playing( t )
            | TransportState::Paused( t ) => Some( t ),
            TransportState::Error { track, .. } => Some( track ),
        }
    }


    pub fn is_playing( &self ) -> bool {
        matches!( self, TransportState::Playing( _ ) )
    }


    /// Same state, pointing at a different record for the same track.
    fn with_track( &self, track: Arc<TrackRecord> ) -> Self {
        match self {
            TransportState::Idle => TransportState::Idle,
            TransportState::Preparing( _ ) => TransportState::Preparing( track ),
            TransportState::Playing( _ ) => TransportState::Playing( track ),
            TransportState::Paused( _ ) => TransportState::Paused( track ),
            TransportState::Error { reason, .. } => TransportState::Error { track, reason: reason.clone() },
        }
    }
}


/// Something the controller reacts to.
#[derive( Debug, Clone, PartialEq )]
pub enum Input {
    Command( Command ),
    Engine( EngineEvent ),
    /// The prepare deadline for a session passed.
    PrepareTimedOut( SessionId ),
}


impl From<Command> for Input {
    fn from( command: Command ) -> Self {
        Input::Command( command )
    }
}


impl From<EngineEvent> for Input {
    fn from( event: EngineEvent ) -> Self {
        Input::Engine( event )
    }
}


/// Instruction produced by the controller, applied in order.
#[derive( Debug, Clone, PartialEq )]
pub enum Effect {
    ResetEngine,
    Prepare { session: SessionId, path: PathBuf },
    Start,
    Pause,
    Resume,
    SeekTo( Duration ),
    Notify( NotifierEvent ),
}


/// Drives playback of the queue.
pub struct TransportController {
    state: TransportState,
    queue: QueueModel,
    session: SessionId,
}


impl TransportController {
    pub fn new( queue: QueueModel ) -> Self {
        Self {
            state: TransportState::Idle,
            queue,
            session: SessionId::default(),
        }
    }


    pub fn state( &self ) -> &TransportState {
        &self.state
    }


    pub fn queue( &self ) -> &QueueModel {
        &self.queue
    }


    /// Session of the most recent prepare.
    pub fn session( &self ) -> SessionId {
        self.session
    }


    /// Current notifier view, optionally with engine progress.
    pub fn snapshot( &self, progress: Option<Progress> ) -> NotifierEvent {
        notifier::project( &self.state, self.queue.state(), self.queue.mode(), progress )
    }


    /// Applies one input and returns the effects to carry out.
    ///
    /// A [`Effect::Notify`] is appended whenever the transport state, the
    /// playback mode or the queue position changed.
    pub fn handle( &mut self, input: Input ) -> Vec<Effect> {
        let before_state = self.state.clone();
        let before_queue = self.queue_marker();

        let mut effects = Vec::new();
        match input {
            Input::Command( command ) => self.on_command( command, &mut effects ),
            Input::Engine( event ) => self.on_engine( event, &mut effects ),
            Input::PrepareTimedOut( session ) => self.on_timeout( session, &mut effects ),
        }

        if self.state != before_state || self.queue_marker() != before_queue {
            effects.push( Effect::Notify( self.snapshot( None ) ) );
        }
        effects
    }


    /// The parts of the queue a listener can observe.
    fn queue_marker( &self ) -> ( PlaybackMode, Option<usize>, usize ) {
        ( self.queue.mode(), self.queue.state().position(), self.queue.state().len() )
    }


    fn on_command( &mut self, command: Command, effects: &mut Vec<Effect> ) {
        match command {
            Command::Play( id ) => self.play( &id, effects ),

            Command::Pause => self.pause( effects ),
            Command::Resume => self.resume( effects ),
            Command::Toggle => match self.state {
                TransportState::Playing( _ ) => self.pause( effects ),
                TransportState::Paused( _ ) => self.resume( effects ),
                _ => tracing::debug!( "Toggle ignored while {}", self.state_name() ),
            },

            Command::SkipNext => match self.queue.advance( AdvanceReason::Manual ) {
                Some( _ ) => self.play_current( effects ),
                None => tracing::debug!( "Skip next ignored: queue exhausted" ),
            },
            Command::SkipPrevious => {
                if self.queue.retreat().is_some() {
                    self.play_current( effects );
                }
            }

            Command::SetShuffle( on ) => self.queue.set_shuffle( on ),
            Command::ToggleShuffle => {
                let on = !self.queue.mode().shuffle;
                self.queue.set_shuffle( on );
            }
            Command::CycleRepeat => {
                self.queue.cycle_repeat();
            }

            Command::SeekTo( position ) => match self.state {
                TransportState::Playing( _ ) | TransportState::Paused( _ ) => {
                    effects.push( Effect::SeekTo( position ) );
                }
                _ => tracing::debug!( "Seek ignored while {}", self.state_name() ),
            },

            Command::Stop => {
                if self.state != TransportState::Idle {
                    tracing::info!( "Stopped" );
                    effects.push( Effect::ResetEngine );
                    self.state = TransportState::Idle;
                }
            }

            Command::LoadCatalog( catalog ) => self.load_catalog( catalog, effects ),
        }
    }


    fn on_engine( &mut self, event: EngineEvent, effects: &mut Vec<Effect> ) {
        if event.session() != self.session {
            tracing::debug!( "Ignoring stale engine event {:?} (current session {})", event, self.session );
            return;
        }

        match event {
            EngineEvent::Ready { .. } => match &self.state {
                TransportState::Preparing( track ) => {
                    tracing::info!( "Playing: {} - {}", track.artist(), track.title() );
                    effects.push( Effect::Start );
                    self.state = TransportState::Playing( Arc::clone( track ) );
                }
                _ => tracing::debug!( "Ready ignored while {}", self.state_name() ),
            },

            EngineEvent::Finished { .. } => match self.state {
                TransportState::Playing( _ ) => {
                    match self.queue.advance( AdvanceReason::AutoCompletion ) {
                        Some( _ ) => self.play_current( effects ),
                        None => {
                            tracing::info!( "End of queue" );
                            effects.push( Effect::ResetEngine );
                            self.state = TransportState::Idle;
                        }
                    }
                }
                _ => tracing::debug!( "Finished ignored while {}", self.state_name() ),
            },

            EngineEvent::Error { reason, .. } => self.fail( reason, effects ),
        }
    }


    fn on_timeout( &mut self, session: SessionId, effects: &mut Vec<Effect> ) {
        if session == self.session && matches!( self.state, TransportState::Preparing( _ ) ) {
            self.fail( PREPARE_TIMEOUT_REASON.to_string(), effects );
        }
    }


    /// Moves an active session into `Error`.
    fn fail( &mut self, reason: String, effects: &mut Vec<Effect> ) {
        match &self.state {
            TransportState::Preparing( track )
            | TransportState::Playing( track )
            | TransportState::Paused( track ) => {
                tracing::error!( "Playback failed for {}: {}", track.source_path().display(), reason );
                let track = Arc::clone( track );
                effects.push( Effect::ResetEngine );
                self.state = TransportState::Error { track, reason };
            }
            _ => tracing::debug!( "Engine error ignored while {}: {}", self.state_name(), reason ),
        }
    }


    fn play( &mut self, id: &TrackId, effects: &mut Vec<Effect> ) {
        if self.queue.select( id ).is_none() {
            tracing::warn!( "Cannot play unknown track {}", id );
            return;
        }
        self.play_current( effects );
    }


    /// Starts preparing the queue's current track under a new session.
    fn play_current( &mut self, effects: &mut Vec<Effect> ) {
        let Some( track ) = self.queue.current().cloned() else {
            return;
        };

        self.session = self.session.next();
        tracing::info!( "Preparing {} (session {})", track.source_path().display(), self.session );

        effects.push( Effect::ResetEngine );
        effects.push( Effect::Prepare {
            session: self.session,
            path: track.source_path().to_path_buf(),
        });
        self.state = TransportState::Preparing( track );
    }


    fn pause( &mut self, effects: &mut Vec<Effect> ) {
        if let TransportState::Playing( track ) = &self.state {
            effects.push( Effect::Pause );
            self.state = TransportState::Paused( Arc::clone( track ) );
        }
    }


    fn resume( &mut self, effects: &mut Vec<Effect> ) {
        if let TransportState::Paused( track ) = &self.state {
            effects.push( Effect::Resume );
            self.state = TransportState::Playing( Arc::clone( track ) );
        }
    }


    fn load_catalog( &mut self, catalog: Catalog, effects: &mut Vec<Effect> ) {
        self.queue.set_catalog( catalog );

        let Some( track ) = self.state.track() else {
            return;
        };

        let fresh = self.queue.catalog().find( track.id() ).cloned();
        match fresh {
            Some( fresh ) => self.state = self.state.with_track( fresh ),
            None => {
                tracing::info!( "Current track left the library, stopping" );
                effects.push( Effect::ResetEngine );
                self.state = TransportState::Idle;
            }
        }
    }


    fn state_name( &self ) -> &'static str {
        match self.state {
            TransportState::Idle => "idle",
            TransportState::Preparing( _ ) => "preparing",
            TransportState::Playing( _ ) => "playing",
            TransportState::Paused( _ ) => "paused",
            TransportState::Error { .. } => "in error",
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::notifier::PlaybackStatus;
    use crate::queue::RepeatMode;
    use std::path::Path;


    fn path( i: usize ) -> PathBuf {
        PathBuf::from( format!( "/music/{:02}.mp3", i ) )
    }


    fn id( i: usize ) -> TrackId {
        TrackId::from_path( &path( i ) )
    }


    fn catalog_of( n: usize ) -> Catalog {
        Catalog::new( ( 0..n ).map( |i| TrackRecord::new( path( i ), format!( "Track {}", i ), "Artist" ) ) )
    }


    fn controller( n: usize ) -> TransportController {
        let mut queue = QueueModel::with_seed( 11 );
        queue.set_catalog( catalog_of( n ) );
        TransportController::new( queue )
    }


    /// Effects without notifications.
    fn engine_ops( effects: Vec<Effect> ) -> Vec<Effect> {
        effects.into_iter().filter( |e| !matches!( e, Effect::Notify( _ ) ) ).collect()
    }


    fn ready( c: &mut TransportController ) -> Vec<Effect> {
        let session = c.session();
        c.handle( EngineEvent::Ready { session }.into() )
    }


    fn finished( c: &mut TransportController ) -> Vec<Effect> {
        let session = c.session();
        c.handle( EngineEvent::Finished { session }.into() )
    }


    fn playing_path( c: &TransportController ) -> Option<&Path> {
        match c.state() {
            TransportState::Playing( t ) => Some( t.source_path() ),
            _ => None,
        }
    }


    fn preparing_path( c: &TransportController ) -> Option<&Path> {
        match c.state() {
            TransportState::Preparing( t ) => Some( t.source_path() ),
            _ => None,
        }
    }


    #[test]
    fn test_play_prepares_then_starts() {
        let mut c = controller( 3 );

        let effects = c.handle( Command::Play( id( 0 ) ).into() );
        assert_eq!( engine_ops( effects.clone() ), vec![
            Effect::ResetEngine,
            Effect::Prepare { session: c.session(), path: path( 0 ) },
        ]);
        assert!( matches!( effects.last(), Some( Effect::Notify( e ) ) if e.status == PlaybackStatus::Preparing ) );
        assert_eq!( preparing_path( &c ), Some( path( 0 ).as_path() ) );

        assert_eq!( engine_ops( ready( &mut c ) ), vec![ Effect::Start ] );
        assert_eq!( playing_path( &c ), Some( path( 0 ).as_path() ) );
    }


    #[test]
    fn test_queue_runs_to_exhaustion() {
        let mut c = controller( 3 );
        c.handle( Command::Play( id( 0 ) ).into() );
        ready( &mut c );

        finished( &mut c );
        assert_eq!( preparing_path( &c ), Some( path( 1 ).as_path() ) );
        ready( &mut c );

        c.handle( Command::SkipNext.into() );
        assert_eq!( preparing_path( &c ), Some( path( 2 ).as_path() ) );
        ready( &mut c );

        assert_eq!( engine_ops( finished( &mut c ) ), vec![ Effect::ResetEngine ] );
        assert_eq!( c.state(), &TransportState::Idle );
        assert_eq!( c.queue().state().position(), Some( 2 ) );
    }


    #[test]
    fn test_skip_next_at_end_is_noop() {
        let mut c = controller( 2 );
        c.handle( Command::Play( id( 1 ) ).into() );
        ready( &mut c );

        let effects = c.handle( Command::SkipNext.into() );
        assert!( effects.is_empty() );
        assert_eq!( playing_path( &c ), Some( path( 1 ).as_path() ) );
    }


    #[test]
    fn test_repeat_one_replays_on_completion() {
        let mut c = controller( 3 );
        c.handle( Command::CycleRepeat.into() );
        assert_eq!( c.queue().mode().repeat, RepeatMode::One );

        c.handle( Command::Play( id( 1 ) ).into() );
        ready( &mut c );
        let first = c.session();

        finished( &mut c );
        assert_eq!( preparing_path( &c ), Some( path( 1 ).as_path() ) );
        assert!( c.session() > first );

        ready( &mut c );
        c.handle( Command::SkipNext.into() );
        assert_eq!( preparing_path( &c ), Some( path( 2 ).as_path() ) );
    }


    #[test]
    fn test_repeat_one_replays_last_track() {
        let mut c = controller( 2 );
        c.handle( Command::CycleRepeat.into() );
        c.handle( Command::Play( id( 1 ) ).into() );
        ready( &mut c );

        let effects = finished( &mut c );
        assert_eq!( engine_ops( effects ), vec![
            Effect::ResetEngine,
            Effect::Prepare { session: c.session(), path: path( 1 ) },
        ]);
        assert_eq!( preparing_path( &c ), Some( path( 1 ).as_path() ) );
        assert_eq!( c.queue().state().position(), Some( 1 ) );
    }


    #[test]
    fn test_repeat_all_wraps_to_first_on_completion() {
        let mut c = controller( 3 );
        c.handle( Command::CycleRepeat.into() );
        c.handle( Command::CycleRepeat.into() );
        assert_eq!( c.queue().mode().repeat, RepeatMode::All );

        c.handle( Command::Play( id( 2 ) ).into() );
        ready( &mut c );

        finished( &mut c );
        assert_eq!( preparing_path( &c ), Some( path( 0 ).as_path() ) );
        assert_eq!( c.queue().state().position(), Some( 0 ) );
    }


    #[test]
    fn test_skip_previous_wraps() {
        let mut c = controller( 3 );
        c.handle( Command::Play( id( 0 ) ).into() );
        c.handle( Command::SkipPrevious.into() );
        assert_eq!( preparing_path( &c ), Some( path( 2 ).as_path() ) );
    }


    #[test]
    fn test_play_while_preparing_supersedes() {
        let mut c = controller( 3 );
        c.handle( Command::Play( id( 0 ) ).into() );
        let stale = c.session();

        let effects = c.handle( Command::Play( id( 2 ) ).into() );
        assert_eq!( effects[ 0 ], Effect::ResetEngine );
        assert_ne!( c.session(), stale );

        let effects = c.handle( EngineEvent::Ready { session: stale }.into() );
        assert!( effects.is_empty() );
        assert_eq!( preparing_path( &c ), Some( path( 2 ).as_path() ) );

        ready( &mut c );
        assert_eq!( playing_path( &c ), Some( path( 2 ).as_path() ) );
    }


    #[test]
    fn test_stale_error_is_ignored() {
        let mut c = controller( 2 );
        c.handle( Command::Play( id( 0 ) ).into() );
        let stale = c.session();
        c.handle( Command::Play( id( 1 ) ).into() );

        let effects = c.handle( EngineEvent::Error { session: stale, reason: "boom".into() }.into() );
        assert!( effects.is_empty() );
        assert!( matches!( c.state(), TransportState::Preparing( _ ) ) );
    }


    #[test]
    fn test_pause_resume_toggle() {
        let mut c = controller( 1 );
        assert!( c.handle( Command::Pause.into() ).is_empty() );
        assert!( c.handle( Command::Toggle.into() ).is_empty() );
        assert_eq!( c.state(), &TransportState::Idle );

        c.handle( Command::Play( id( 0 ) ).into() );
        assert!( engine_ops( c.handle( Command::Toggle.into() ) ).is_empty() );

        ready( &mut c );
        assert_eq!( engine_ops( c.handle( Command::Toggle.into() ) ), vec![ Effect::Pause ] );
        assert!( matches!( c.state(), TransportState::Paused( _ ) ) );
        assert!( c.handle( Command::Pause.into() ).is_empty() );

        assert_eq!( engine_ops( c.handle( Command::Resume.into() ) ), vec![ Effect::Resume ] );
        assert!( c.state().is_playing() );
    }


    #[test]
    fn test_prepare_error_then_recover() {
        let mut c = controller( 2 );
        c.handle( Command::Play( id( 0 ) ).into() );

        let session = c.session();
        let effects = c.handle( EngineEvent::Error { session, reason: "unsupported format".into() }.into() );
        assert_eq!( engine_ops( effects ), vec![ Effect::ResetEngine ] );
        assert!( matches!( c.state(), TransportState::Error { reason, .. } if reason == "unsupported format" ) );

        assert!( c.handle( Command::Resume.into() ).is_empty() );

        c.handle( Command::SkipNext.into() );
        ready( &mut c );
        assert_eq!( playing_path( &c ), Some( path( 1 ).as_path() ) );
    }


    #[test]
    fn test_error_mid_playback() {
        let mut c = controller( 2 );
        c.handle( Command::Play( id( 0 ) ).into() );
        ready( &mut c );
        c.handle( Command::Pause.into() );

        let session = c.session();
        c.handle( EngineEvent::Error { session, reason: "device lost".into() }.into() );
        assert_eq!( c.state().track().map( |t| t.id() ), Some( &id( 0 ) ) );
        assert!( matches!( c.state(), TransportState::Error { .. } ) );
    }


    #[test]
    fn test_prepare_timeout() {
        let mut c = controller( 1 );
        c.handle( Command::Play( id( 0 ) ).into() );
        let session = c.session();

        assert!( c.handle( Input::PrepareTimedOut( session.next() ) ).is_empty() );

        c.handle( Input::PrepareTimedOut( session ) );
        assert!( matches!( c.state(), TransportState::Error { reason, .. } if reason == PREPARE_TIMEOUT_REASON ) );
    }


    #[test]
    fn test_unknown_track_is_noop() {
        let mut c = controller( 2 );
        let effects = c.handle( Command::Play( TrackId::from_path( Path::new( "/elsewhere.mp3" ) ) ).into() );
        assert!( effects.is_empty() );
        assert_eq!( c.state(), &TransportState::Idle );
    }


    #[test]
    fn test_empty_catalog_commands_are_noops() {
        let mut c = controller( 0 );
        for command in [ Command::SkipNext, Command::SkipPrevious, Command::Toggle, Command::Stop ] {
            assert!( c.handle( command.into() ).is_empty() );
        }
        assert_eq!( c.state(), &TransportState::Idle );
    }


    #[test]
    fn test_seek_only_when_loaded() {
        let mut c = controller( 1 );
        let to = Duration::from_secs( 30 );
        assert!( c.handle( Command::SeekTo( to ).into() ).is_empty() );

        c.handle( Command::Play( id( 0 ) ).into() );
        assert!( c.handle( Command::SeekTo( to ).into() ).is_empty() );

        ready( &mut c );
        assert_eq!( c.handle( Command::SeekTo( to ).into() ), vec![ Effect::SeekTo( to ) ] );
    }


    #[test]
    fn test_mode_change_notifies() {
        let mut c = controller( 3 );
        let effects = c.handle( Command::SetShuffle( true ).into() );
        assert!( matches!( effects.as_slice(), [ Effect::Notify( e ) ] if e.mode.shuffle ) );

        let effects = c.handle( Command::CycleRepeat.into() );
        assert!( matches!( effects.as_slice(), [ Effect::Notify( e ) ] if e.mode.repeat == RepeatMode::One ) );
    }


    #[test]
    fn test_stop_goes_idle() {
        let mut c = controller( 2 );
        c.handle( Command::Play( id( 0 ) ).into() );
        ready( &mut c );

        assert_eq!( engine_ops( c.handle( Command::Stop.into() ) ), vec![ Effect::ResetEngine ] );
        assert_eq!( c.state(), &TransportState::Idle );

        assert!( finished( &mut c ).is_empty() );
    }


    #[test]
    fn test_reload_keeps_or_drops_current_track() {
        let mut c = controller( 3 );
        c.handle( Command::Play( id( 1 ) ).into() );
        ready( &mut c );

        let retitled = Catalog::new( vec![ TrackRecord::new( path( 1 ), "Renamed", "Artist" ) ] );
        let effects = c.handle( Command::LoadCatalog( retitled ).into() );
        assert!( engine_ops( effects ).is_empty() );
        assert_eq!( c.state().track().map( |t| t.title() ), Some( "Renamed" ) );
        assert!( c.state().is_playing() );

        let effects = c.handle( Command::LoadCatalog( catalog_of( 1 ) ).into() );
        assert_eq!( engine_ops( effects ), vec![ Effect::ResetEngine ] );
        assert_eq!( c.state(), &TransportState::Idle );
    }
}
