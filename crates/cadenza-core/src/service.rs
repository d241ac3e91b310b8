//! Player service
//!
//! Runs the transport controller and the audio engine on one dedicated
//! thread. Front ends talk to it through a cloneable [`PlayerHandle`]: commands
//! go in over a channel, notifier events come back over a broadcast, and the
//! latest event is always available as a snapshot.

use std::collections::VecDeque;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{ broadcast, mpsc, oneshot, watch };
use tokio::time::{ Instant, MissedTickBehavior };

use crate::catalog::{ Catalog, TrackId };
use crate::command::Command;
use crate::engine::{ AudioEngine, EngineError, EngineEvent, EngineEvents, SessionId };
use crate::notifier::{ NotifierEvent, Progress };
use crate::queue::{ PlaybackMode, QueueModel };
use crate::transport::{ Effect, Input, TransportController, TransportState };


/// Errors from talking to the player service.
#[derive( Debug, Error )]
pub enum ServiceError {
    #[error( "Player service is not running" )]
    Closed,

    #[error( "Player service failed to start: {0}" )]
    Startup( String ),
}


/// Service tuning.
#[derive( Debug, Clone )]
pub struct PlayerConfig {
    /// How often progress is broadcast while playing.
    pub poll_interval: Duration,
    /// Give up on a prepare after this long. `None` waits forever.
    pub prepare_timeout: Option<Duration>,
    /// Fixed shuffle seed for reproducible runs.
    pub shuffle_seed: Option<u64>,
    pub initial_mode: PlaybackMode,
    /// Broadcast buffer; slow subscribers skip ahead past this many events.
    pub event_capacity: usize,
}


impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs( 1 ),
            prepare_timeout: None,
            shuffle_seed: None,
            initial_mode: PlaybackMode::default(),
            event_capacity: 64,
        }
    }
}


enum Request {
    Command( Command ),
    Progress( oneshot::Sender<Progress> ),
    Shutdown,
}


/// Cloneable handle to a running [`PlayerService`].
#[derive( Clone )]
pub struct PlayerHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<NotifierEvent>,
    latest: watch::Receiver<NotifierEvent>,
}


impl PlayerHandle {
    /// Queues a command for the transport.
    pub fn send( &self, command: Command ) -> Result<(), ServiceError> {
        self.requests
            .send( Request::Command( command ) )
            .map_err( |_| ServiceError::Closed )
    }


    pub fn play( &self, id: TrackId ) -> Result<(), ServiceError> {
        self.send( Command::Play( id ) )
    }


    pub fn pause( &self ) -> Result<(), ServiceError> {
        self.send( Command::Pause )
    }


    pub fn resume( &self ) -> Result<(), ServiceError> {
        self.send( Command::Resume )
    }


    pub fn toggle( &self ) -> Result<(), ServiceError> {
        self.send( Command::Toggle )
    }


    pub fn skip_next( &self ) -> Result<(), ServiceError> {
        self.send( Command::SkipNext )
    }


    pub fn skip_previous( &self ) -> Result<(), ServiceError> {
        self.send( Command::SkipPrevious )
    }


    pub fn set_shuffle( &self, on: bool ) -> Result<(), ServiceError> {
        self.send( Command::SetShuffle( on ) )
    }


    pub fn cycle_repeat( &self ) -> Result<(), ServiceError> {
        self.send( Command::CycleRepeat )
    }


    pub fn seek_to( &self, position: Duration ) -> Result<(), ServiceError> {
        self.send( Command::SeekTo( position ) )
    }


    pub fn stop( &self ) -> Result<(), ServiceError> {
        self.send( Command::Stop )
    }


    pub fn load_catalog( &self, catalog: Catalog ) -> Result<(), ServiceError> {
        self.send( Command::LoadCatalog( catalog ) )
    }


    /// Receives every notifier event published from now on.
    pub fn subscribe( &self ) -> broadcast::Receiver<NotifierEvent> {
        self.events.subscribe()
    }


    /// Latest published notifier event.
    pub fn snapshot( &self ) -> NotifierEvent {
        self.latest.borrow().clone()
    }


    /// Asks the engine for its position and duration.
    pub async fn progress( &self ) -> Result<Progress, ServiceError> {
        let ( reply, response ) = oneshot::channel();
        self.requests
            .send( Request::Progress( reply ) )
            .map_err( |_| ServiceError::Closed )?;
        response.await.map_err( |_| ServiceError::Closed )
    }


    /// Same as [`PlayerHandle::progress`] for callers outside a runtime.
    pub fn blocking_progress( &self ) -> Result<Progress, ServiceError> {
        let ( reply, response ) = oneshot::channel();
        self.requests
            .send( Request::Progress( reply ) )
            .map_err( |_| ServiceError::Closed )?;
        response.blocking_recv().map_err( |_| ServiceError::Closed )
    }


    /// Asks the service to stop. Pending commands ahead of it still run.
    pub fn shutdown( &self ) -> Result<(), ServiceError> {
        self.requests
            .send( Request::Shutdown )
            .map_err( |_| ServiceError::Closed )
    }
}


/// Owns the service thread. Dropping it stops playback and joins the thread.
pub struct PlayerService {
    handle: PlayerHandle,
    thread: Option<JoinHandle<()>>,
}


impl PlayerService {
    /// Starts the service thread.
    ///
    /// The engine is built on the service thread, since output streams may not
    /// be movable between threads.
    ///
    /// @param config - Service tuning
    /// @param make_engine - Builds the engine from the channel it reports on
    ///
    /// @returns The running service, or the startup failure
    pub fn spawn<E, F>( config: PlayerConfig, make_engine: F ) -> Result<Self, ServiceError>
    where
        E: AudioEngine + 'static,
        F: FnOnce( EngineEvents ) -> Result<E, EngineError> + Send + 'static,
    {
        let queue = match config.shuffle_seed {
            Some( seed ) => QueueModel::with_seed( seed ),
            None => QueueModel::new(),
        }
        .with_mode( config.initial_mode );
        let controller = TransportController::new( queue );

        let ( request_tx, request_rx ) = mpsc::unbounded_channel();
        let ( events_tx, _ ) = broadcast::channel( config.event_capacity.max( 1 ) );
        let ( latest_tx, latest_rx ) = watch::channel( controller.snapshot( None ) );
        let ( started_tx, started_rx ) = std::sync::mpsc::channel();

        let broadcast = events_tx.clone();
        let thread = std::thread::Builder::new()
            .name( "player-service".into() )
            .spawn( move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                    Ok( runtime ) => runtime,
                    Err( e ) => {
                        let _ = started_tx.send( Err( ServiceError::Startup( e.to_string() ) ) );
                        return;
                    }
                };

                let ( engine_tx, engine_rx ) = mpsc::unbounded_channel();
                let engine = match make_engine( engine_tx ) {
                    Ok( engine ) => engine,
                    Err( e ) => {
                        let _ = started_tx.send( Err( ServiceError::Startup( e.to_string() ) ) );
                        return;
                    }
                };
                let _ = started_tx.send( Ok( () ) );

                let service = ServiceLoop {
                    controller,
                    engine,
                    config,
                    requests: request_rx,
                    engine_events: engine_rx,
                    broadcast,
                    latest: latest_tx,
                    deadline: None,
                };
                runtime.block_on( service.run() );
            })
            .map_err( |e| ServiceError::Startup( e.to_string() ) )?;

        started_rx
            .recv()
            .map_err( |_| ServiceError::Startup( "service thread exited".into() ) )??;

        tracing::info!( "Player service started" );

        Ok( Self {
            handle: PlayerHandle {
                requests: request_tx,
                events: events_tx,
                latest: latest_rx,
            },
            thread: Some( thread ),
        })
    }


    /// A new handle to the service.
    pub fn handle( &self ) -> PlayerHandle {
        self.handle.clone()
    }
}


impl Drop for PlayerService {
    fn drop( &mut self ) {
        let _ = self.handle.shutdown();
        if let Some( thread ) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!( "Player service thread panicked" );
            }
        }
    }
}


/// State living on the service thread.
struct ServiceLoop<E> {
    controller: TransportController,
    engine: E,
    config: PlayerConfig,
    requests: mpsc::UnboundedReceiver<Request>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    broadcast: broadcast::Sender<NotifierEvent>,
    latest: watch::Sender<NotifierEvent>,
    /// Pending prepare deadline and the session it belongs to.
    deadline: Option<( SessionId, Instant )>,
}


impl<E: AudioEngine> ServiceLoop<E> {
    async fn run( mut self ) {
        let mut poll = tokio::time::interval( self.config.poll_interval );
        poll.set_missed_tick_behavior( MissedTickBehavior::Delay );
        let mut polling = false;

        loop {
            let deadline = self.deadline.map( |( _, at )| at );

            tokio::select! {
                request = self.requests.recv() => match request {
                    Some( Request::Command( command ) ) => self.dispatch( command.into() ),
                    Some( Request::Progress( reply ) ) => {
                        let _ = reply.send( self.progress() );
                    }
                    Some( Request::Shutdown ) | None => break,
                },
                Some( event ) = self.engine_events.recv() => self.dispatch( event.into() ),
                _ = poll.tick(), if polling => {
                    let event = self.controller.snapshot( Some( self.progress() ) );
                    self.publish( event );
                }
                _ = expire( deadline ), if deadline.is_some() => {
                    if let Some(( session, _ )) = self.deadline.take() {
                        tracing::warn!( "Prepare for session {} timed out", session );
                        self.dispatch( Input::PrepareTimedOut( session ) );
                    }
                }
            }

            let playing = self.controller.state().is_playing();
            if playing && !polling {
                poll.reset();
            }
            polling = playing;
        }

        self.engine.reset();
        tracing::info!( "Player service stopped" );
    }


    /// Feeds an input through the controller and carries out its effects.
    ///
    /// A failing engine call becomes an error event for the current session,
    /// and the rest of that input's effects are dropped so no notification
    /// announces a state the engine never reached.
    fn dispatch( &mut self, input: Input ) {
        let mut inputs = VecDeque::from( [ input ] );

        while let Some( input ) = inputs.pop_front() {
            for effect in self.controller.handle( input ) {
                if let Err( e ) = self.apply( effect ) {
                    tracing::error!( "Engine call failed: {}", e );
                    inputs.push_back( Input::Engine( EngineEvent::Error {
                        session: self.controller.session(),
                        reason: e.to_string(),
                    }));
                    break;
                }
            }

            if !matches!( self.controller.state(), TransportState::Preparing( _ ) ) {
                self.deadline = None;
            }
        }
    }


    fn apply( &mut self, effect: Effect ) -> Result<(), EngineError> {
        match effect {
            Effect::ResetEngine => self.engine.reset(),
            Effect::Prepare { session, path } => {
                self.engine.prepare( session, &path );
                self.deadline = self.config.prepare_timeout.map( |timeout| ( session, Instant::now() + timeout ) );
            }
            Effect::Start => self.engine.start()?,
            Effect::Pause => self.engine.pause()?,
            Effect::Resume => self.engine.resume()?,
            Effect::SeekTo( position ) => self.engine.seek_to( position )?,
            Effect::Notify( mut event ) => {
                if matches!( self.controller.state(), TransportState::Playing( _ ) | TransportState::Paused( _ ) ) {
                    event.progress = Some( self.progress() );
                }
                self.publish( event );
            }
        }
        Ok( () )
    }


    fn progress( &self ) -> Progress {
        Progress {
            position: self.engine.position(),
            duration: self.engine.duration(),
        }
    }


    fn publish( &self, event: NotifierEvent ) {
        self.latest.send_replace( event.clone() );
        // No subscribers is fine
        let _ = self.broadcast.send( event );
    }
}


async fn expire( deadline: Option<Instant> ) {
    match deadline {
        Some( at ) => tokio::time::sleep_until( at ).await,
        None => std::future::pending().await,
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::path::{ Path, PathBuf };
    use std::sync::{ Arc, Mutex };

    use crate::catalog::TrackRecord;
    use crate::notifier::PlaybackStatus;
    use crate::transport::PREPARE_TIMEOUT_REASON;


    #[derive( Default )]
    struct Probe {
        calls: Vec<String>,
        session: Option<SessionId>,
        events: Option<EngineEvents>,
    }


    type SharedProbe = Arc<Mutex<Probe>>;


    #[derive( Clone, Copy, Default )]
    struct Behaviour {
        auto_ready: bool,
        fail_start: bool,
    }


    struct FakeEngine {
        probe: SharedProbe,
        behaviour: Behaviour,
        position: Duration,
        loaded: bool,
    }


    impl FakeEngine {
        fn record( &self, call: impl Into<String> ) {
            self.probe.lock().unwrap().calls.push( call.into() );
        }
    }


    impl AudioEngine for FakeEngine {
        fn reset( &mut self ) {
            self.loaded = false;
            self.position = Duration::ZERO;
            self.record( "reset" );
        }


        fn prepare( &mut self, session: SessionId, path: &Path ) {
            self.record( format!( "prepare {}", path.display() ) );
            let mut probe = self.probe.lock().unwrap();
            probe.session = Some( session );
            if self.behaviour.auto_ready {
                if let Some( events ) = &probe.events {
                    events.send( EngineEvent::Ready { session } ).unwrap();
                }
            }
        }


        fn start( &mut self ) -> Result<(), EngineError> {
            self.record( "start" );
            if self.behaviour.fail_start {
                return Err( EngineError::NotPrepared );
            }
            self.loaded = true;
            Ok( () )
        }


        fn pause( &mut self ) -> Result<(), EngineError> {
            self.record( "pause" );
            Ok( () )
        }


        fn resume( &mut self ) -> Result<(), EngineError> {
            self.record( "resume" );
            Ok( () )
        }


        fn seek_to( &mut self, position: Duration ) -> Result<(), EngineError> {
            self.record( "seek" );
            self.position = position;
            Ok( () )
        }


        fn position( &self ) -> Duration {
            self.position
        }


        fn duration( &self ) -> Option<Duration> {
            self.loaded.then_some( Duration::from_secs( 180 ) )
        }
    }


    fn path( i: usize ) -> PathBuf {
        PathBuf::from( format!( "/music/{:02}.mp3", i ) )
    }


    fn catalog_of( n: usize ) -> Catalog {
        Catalog::new( ( 0..n ).map( |i| TrackRecord::new( path( i ), format!( "Track {}", i ), "Artist" ) ) )
    }


    fn spawn( config: PlayerConfig, behaviour: Behaviour ) -> ( PlayerService, SharedProbe ) {
        let probe = SharedProbe::default();
        let engine_probe = Arc::clone( &probe );
        let service = PlayerService::spawn( config, move |events| {
            engine_probe.lock().unwrap().events = Some( events );
            Ok( FakeEngine { probe: engine_probe, behaviour, position: Duration::ZERO, loaded: false } )
        })
        .unwrap();
        ( service, probe )
    }


    fn auto_ready() -> Behaviour {
        Behaviour { auto_ready: true, ..Behaviour::default() }
    }


    /// Injects an engine event for the latest prepared session.
    fn inject( probe: &SharedProbe, make: impl FnOnce( SessionId ) -> EngineEvent ) {
        let probe = probe.lock().unwrap();
        let session = probe.session.unwrap();
        probe.events.as_ref().unwrap().send( make( session ) ).unwrap();
    }


    async fn wait_for(
        events: &mut broadcast::Receiver<NotifierEvent>,
        mut pred: impl FnMut( &NotifierEvent ) -> bool,
    ) -> NotifierEvent {
        tokio::time::timeout( Duration::from_secs( 5 ), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred( &event ) {
                    return event;
                }
            }
        })
        .await
        .expect( "timed out waiting for notifier event" )
    }


    fn is_playing( i: usize ) -> impl Fn( &NotifierEvent ) -> bool {
        move |e| e.status == PlaybackStatus::Playing && e.track.as_ref().map( |t| t.source_path() ) == Some( path( i ).as_path() )
    }


    #[tokio::test]
    async fn test_play_reaches_playing() {
        let ( service, probe ) = spawn( PlayerConfig::default(), auto_ready() );
        let handle = service.handle();
        let mut events = handle.subscribe();

        handle.load_catalog( catalog_of( 3 ) ).unwrap();
        handle.play( TrackId::from_path( &path( 1 ) ) ).unwrap();

        let event = wait_for( &mut events, is_playing( 1 ) ).await;
        assert!( event.is_playing );
        assert_eq!( event.queue_position, Some( 1 ) );
        assert_eq!( handle.snapshot().status, PlaybackStatus::Playing );

        let calls = probe.lock().unwrap().calls.clone();
        assert_eq!( calls, vec![ "reset".to_string(), "prepare /music/01.mp3".into(), "start".into() ] );
    }


    #[tokio::test]
    async fn test_finished_advances_to_next_track() {
        let ( service, probe ) = spawn( PlayerConfig::default(), auto_ready() );
        let handle = service.handle();
        let mut events = handle.subscribe();

        handle.load_catalog( catalog_of( 2 ) ).unwrap();
        handle.play( TrackId::from_path( &path( 0 ) ) ).unwrap();
        wait_for( &mut events, is_playing( 0 ) ).await;

        inject( &probe, |session| EngineEvent::Finished { session } );
        wait_for( &mut events, is_playing( 1 ) ).await;

        inject( &probe, |session| EngineEvent::Finished { session } );
        let event = wait_for( &mut events, |e| e.status == PlaybackStatus::Idle ).await;
        assert_eq!( event.queue_position, Some( 1 ) );
    }


    #[tokio::test]
    async fn test_prepare_timeout_enters_error() {
        let config = PlayerConfig {
            prepare_timeout: Some( Duration::from_millis( 50 ) ),
            ..PlayerConfig::default()
        };
        let ( service, _probe ) = spawn( config, Behaviour::default() );
        let handle = service.handle();
        let mut events = handle.subscribe();

        handle.load_catalog( catalog_of( 1 ) ).unwrap();
        handle.play( TrackId::from_path( &path( 0 ) ) ).unwrap();

        let event = wait_for( &mut events, |e| matches!( e.status, PlaybackStatus::Error( _ ) ) ).await;
        assert_eq!( event.status, PlaybackStatus::Error( PREPARE_TIMEOUT_REASON.into() ) );
    }


    #[tokio::test]
    async fn test_failed_start_surfaces_error() {
        let behaviour = Behaviour { auto_ready: true, fail_start: true };
        let ( service, probe ) = spawn( PlayerConfig::default(), behaviour );
        let handle = service.handle();
        let mut events = handle.subscribe();

        handle.load_catalog( catalog_of( 1 ) ).unwrap();
        handle.play( TrackId::from_path( &path( 0 ) ) ).unwrap();

        let mut seen = Vec::new();
        let event = wait_for( &mut events, |e| {
            seen.push( e.status.clone() );
            matches!( e.status, PlaybackStatus::Error( _ ) )
        }).await;
        assert_eq!( event.status, PlaybackStatus::Error( EngineError::NotPrepared.to_string() ) );
        assert!( !seen.contains( &PlaybackStatus::Playing ), "published {:?}", seen );
        assert!( !handle.snapshot().is_playing );
        assert_eq!( probe.lock().unwrap().calls.last().map( String::as_str ), Some( "reset" ) );
    }


    #[tokio::test]
    async fn test_stale_events_are_dropped() {
        let ( service, probe ) = spawn( PlayerConfig::default(), Behaviour::default() );
        let handle = service.handle();
        let mut events = handle.subscribe();

        handle.load_catalog( catalog_of( 2 ) ).unwrap();
        handle.play( TrackId::from_path( &path( 0 ) ) ).unwrap();
        wait_for( &mut events, |e| e.status == PlaybackStatus::Preparing ).await;
        let stale = probe.lock().unwrap().session.unwrap();

        handle.play( TrackId::from_path( &path( 1 ) ) ).unwrap();
        wait_for( &mut events, |e| e.queue_position == Some( 1 ) ).await;

        let sender = probe.lock().unwrap().events.clone().unwrap();
        sender.send( EngineEvent::Ready { session: stale } ).unwrap();
        inject( &probe, |session| EngineEvent::Ready { session } );

        let event = wait_for( &mut events, |e| e.status == PlaybackStatus::Playing ).await;
        assert_eq!( event.track.map( |t| t.source_path().to_path_buf() ), Some( path( 1 ) ) );
    }


    #[tokio::test]
    async fn test_progress_passthrough_and_seek() {
        let ( service, _probe ) = spawn( PlayerConfig::default(), auto_ready() );
        let handle = service.handle();
        let mut events = handle.subscribe();

        assert_eq!( handle.progress().await.unwrap(), Progress::default() );

        handle.load_catalog( catalog_of( 1 ) ).unwrap();
        handle.play( TrackId::from_path( &path( 0 ) ) ).unwrap();
        wait_for( &mut events, is_playing( 0 ) ).await;

        handle.seek_to( Duration::from_secs( 30 ) ).unwrap();
        let progress = handle.progress().await.unwrap();
        assert_eq!( progress.position, Duration::from_secs( 30 ) );
        assert_eq!( progress.duration, Some( Duration::from_secs( 180 ) ) );
    }


    #[tokio::test]
    async fn test_poll_publishes_while_playing() {
        let config = PlayerConfig {
            poll_interval: Duration::from_millis( 20 ),
            ..PlayerConfig::default()
        };
        let ( service, _probe ) = spawn( config, auto_ready() );
        let handle = service.handle();
        let mut events = handle.subscribe();

        handle.load_catalog( catalog_of( 1 ) ).unwrap();
        handle.play( TrackId::from_path( &path( 0 ) ) ).unwrap();
        wait_for( &mut events, is_playing( 0 ) ).await;

        let tick = wait_for( &mut events, |_| true ).await;
        assert_eq!( tick.status, PlaybackStatus::Playing );
        assert!( tick.progress.is_some() );
    }


    #[tokio::test]
    async fn test_mode_commands_notify() {
        let ( service, _probe ) = spawn( PlayerConfig::default(), Behaviour::default() );
        let handle = service.handle();
        let mut events = handle.subscribe();

        handle.load_catalog( catalog_of( 4 ) ).unwrap();
        handle.set_shuffle( true ).unwrap();
        wait_for( &mut events, |e| e.mode.shuffle ).await;

        handle.cycle_repeat().unwrap();
        handle.cycle_repeat().unwrap();
        let event = wait_for( &mut events, |e| e.mode.repeat == crate::queue::RepeatMode::All ).await;
        assert!( !event.mode.shuffle );
    }


    #[test]
    fn test_startup_failure_is_reported() {
        let result = PlayerService::spawn( PlayerConfig::default(), |_events| {
            Err::<FakeEngine, _>( EngineError::NotPlaying )
        });
        assert!( matches!( result, Err( ServiceError::Startup( _ ) ) ) );
    }


    #[test]
    fn test_handle_reports_closed_after_drop() {
        let ( service, _probe ) = spawn( PlayerConfig::default(), Behaviour::default() );
        let handle = service.handle();
        drop( service );

        assert!( matches!( handle.toggle(), Err( ServiceError::Closed ) ) );
        assert!( matches!( handle.blocking_progress(), Err( ServiceError::Closed ) ) );
    }
}
