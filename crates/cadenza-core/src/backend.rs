//! Symphonia + cpal implementation of [`AudioEngine`]
//!
//! `prepare` opens the source on a worker thread. `start` builds the device
//! stream and hands the decoder to a decode thread that feeds it.

use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::{ Arc, Mutex, PoisonError };
use std::thread;
use std::time::Duration;

use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::decoder::Decoder;
use crate::engine::{ AudioEngine, EngineError, EngineEvent, EngineEvents, SessionId };
use crate::output::{ AudioOutput, SampleBuffer };


/// Output chunk size handed to the resampler.
const RESAMPLE_CHUNK: usize = 1024;


/// A source that finished preparing and waits for `start`.
struct Prepared {
    session: SessionId,
    decoder: Decoder,
}


/// Shared between the engine and its decode thread.
struct DecodeShared {
    stop: AtomicBool,
    // Source position the played-frame count starts from
    position_base: Mutex<Duration>,
    seek_request: Mutex<Option<Duration>>,
}


/// The running session.
struct Playback {
    shared: Arc<DecodeShared>,
    sample_buffer: Arc<SampleBuffer>,
    // Dropping the output stops the device stream
    _output: AudioOutput,
    thread: Option<thread::JoinHandle<()>>,
    output_rate: u32,
    duration: Option<Duration>,
}


/// Production engine: decodes with Symphonia, resamples with rubato and
/// plays through the default cpal device.
pub struct SymphoniaEngine {
    events: EngineEvents,
    generation: Arc<AtomicU64>,
    prepared: Arc<Mutex<Option<Prepared>>>,
    session: Option<SessionId>,
    playback: Option<Playback>,
}


impl SymphoniaEngine {
    pub fn new( events: EngineEvents ) -> Result<Self, EngineError> {
        Ok( Self {
            events,
            generation: Arc::new( AtomicU64::new( 0 ) ),
            prepared: Arc::new( Mutex::new( None ) ),
            session: None,
            playback: None,
        })
    }


    fn take_prepared( &self, session: SessionId ) -> Option<Decoder> {
        let mut slot = self.prepared.lock().unwrap_or_else( PoisonError::into_inner );
        match slot.take() {
            Some( prepared ) if prepared.session == session => Some( prepared.decoder ),
            _ => None,
        }
    }


    fn playback( &self ) -> Result<&Playback, EngineError> {
        self.playback.as_ref().ok_or( EngineError::NotPlaying )
    }
}


impl AudioEngine for SymphoniaEngine {
    fn reset( &mut self ) {
        self.generation.fetch_add( 1, Ordering::SeqCst );
        self.prepared.lock().unwrap_or_else( PoisonError::into_inner ).take();
        self.session = None;

        if let Some( mut playback ) = self.playback.take() {
            playback.shared.stop.store( true, Ordering::Relaxed );
            playback.sample_buffer.clear();
            if let Some( thread ) = playback.thread.take() {
                let _ = thread.join();
            }
            tracing::debug!( "Engine reset" );
        }
    }


    fn prepare( &mut self, session: SessionId, path: &Path ) {
        self.session = Some( session );

        let generation = Arc::clone( &self.generation );
        let expected = generation.load( Ordering::SeqCst );
        let prepared = Arc::clone( &self.prepared );
        let events = self.events.clone();
        let path: PathBuf = path.to_path_buf();

        tracing::info!( "Preparing {:?} ({})", path, session );

        thread::spawn( move || {
            let opened = Decoder::open( &path );
            if generation.load( Ordering::SeqCst ) != expected {
                tracing::debug!( "Prepare {} superseded", session );
                return;
            }

            let event = match opened {
                Ok( decoder ) => {
                    *prepared.lock().unwrap_or_else( PoisonError::into_inner ) = Some( Prepared { session, decoder } );
                    EngineEvent::Ready { session }
                }
                Err( e ) => EngineEvent::Error { session, reason: e.to_string() },
            };
            let _ = events.send( event );
        });
    }


    fn start( &mut self ) -> Result<(), EngineError> {
        let session = self.session.ok_or( EngineError::NotPrepared )?;
        let decoder = self.take_prepared( session ).ok_or( EngineError::NotPrepared )?;

        let source_rate = decoder.sample_rate();
        let channels = decoder.channels() as u16;
        let duration = decoder.duration();

        let ( output, sample_buffer ) = AudioOutput::new( source_rate, channels )?;
        let resampling = if source_rate != output.sample_rate() {
            tracing::info!( "Resampling: {} Hz → {} Hz", source_rate, output.sample_rate() );
            Some( Resampling::new( source_rate, output.sample_rate(), channels as usize )? )
        } else {
            None
        };
        let output_rate = output.sample_rate();
        output.play()?;

        let shared = Arc::new( DecodeShared {
            stop: AtomicBool::new( false ),
            position_base: Mutex::new( Duration::ZERO ),
            seek_request: Mutex::new( None ),
        });

        let job = DecodeJob {
            session,
            decoder,
            resampling,
            shared: Arc::clone( &shared ),
            sample_buffer: Arc::clone( &sample_buffer ),
            events: self.events.clone(),
        };
        let thread = thread::Builder::new()
            .name( format!( "cadenza-decode-{}", session ) )
            .spawn( move || job.run() )?;

        self.playback = Some( Playback {
            shared,
            sample_buffer,
            _output: output,
            thread: Some( thread ),
            output_rate,
            duration,
        });

        tracing::info!( "Playback started ({})", session );
        Ok(())
    }


    fn pause( &mut self ) -> Result<(), EngineError> {
        self.playback()?.sample_buffer.set_paused( true );
        Ok(())
    }


    fn resume( &mut self ) -> Result<(), EngineError> {
        self.playback()?.sample_buffer.set_paused( false );
        Ok(())
    }


    fn seek_to( &mut self, position: Duration ) -> Result<(), EngineError> {
        let playback = self.playback()?;
        let clamped = match playback.duration {
            Some( total ) => position.min( total ),
            None => position,
        };
        *playback.shared.seek_request.lock().unwrap_or_else( PoisonError::into_inner ) = Some( clamped );
        Ok(())
    }


    fn position( &self ) -> Duration {
        match &self.playback {
            Some( playback ) => {
                let base = *playback.shared.position_base.lock().unwrap_or_else( PoisonError::into_inner );
                played_position( base, playback.sample_buffer.frames_played(), playback.output_rate )
            }
            None => Duration::ZERO,
        }
    }


    fn duration( &self ) -> Option<Duration> {
        self.playback.as_ref().and_then( |p| p.duration )
    }
}


impl Drop for SymphoniaEngine {
    fn drop( &mut self ) {
        self.reset();
    }
}


/// Position heard so far: the seek base plus device frames consumed.
fn played_position( base: Duration, frames: u64, output_rate: u32 ) -> Duration {
    if output_rate == 0 {
        return base;
    }
    base + Duration::from_secs_f64( frames as f64 / output_rate as f64 )
}


/// Sample-rate conversion with carry-over between decoder packets.
struct Resampling {
    resampler: FastFixedOut<f32>,
    pending: Vec<Vec<f32>>,
}


impl Resampling {
    fn new( from: u32, to: u32, channels: usize ) -> Result<Self, EngineError> {
        let resampler = FastFixedOut::<f32>::new(
            to as f64 / from as f64,
            2.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            channels,
        ).map_err( |e| EngineError::Resample( e.to_string() ) )?;

        Ok( Self { resampler, pending: vec![ Vec::new(); channels ] } )
    }


    /// Accepts interleaved input and returns whatever whole chunks are ready.
    fn process( &mut self, interleaved: &[f32] ) -> Vec<f32> {
        let channels = self.pending.len();
        for frame in interleaved.chunks_exact( channels ) {
            for ( ch, sample ) in frame.iter().enumerate() {
                self.pending[ ch ].push( *sample );
            }
        }

        let mut out = Vec::new();
        while self.pending[ 0 ].len() >= self.resampler.input_frames_next() {
            let needed = self.resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map( |ch| ch.drain( ..needed ).collect() ).collect();
            match self.resampler.process( &chunk, None ) {
                Ok( resampled ) => out.extend( interleave( &resampled ) ),
                Err( e ) => {
                    tracing::error!( "Resample error: {}", e );
                    break;
                }
            }
        }
        out
    }


    /// Drains the remaining input at end of stream.
    fn flush( &mut self ) -> Vec<f32> {
        if self.pending[ 0 ].is_empty() {
            return Vec::new();
        }
        let channels = self.pending.len();
        let rest = std::mem::replace( &mut self.pending, vec![ Vec::new(); channels ] );
        match self.resampler.process_partial( Some( rest.as_slice() ), None ) {
            Ok( resampled ) => interleave( &resampled ),
            Err( e ) => {
                tracing::error!( "Final resample error: {}", e );
                Vec::new()
            }
        }
    }


    fn clear( &mut self ) {
        for ch in &mut self.pending {
            ch.clear();
        }
        self.resampler.reset();
    }
}


/// Planar to interleaved: [[L0, L1], [R0, R1]] → [L0, R0, L1, R1].
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    let frames = channels.first().map_or( 0, |c| c.len() );
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        out.extend( channels.iter().map( |ch| ch[ f ] ) );
    }
    out
}


/// Everything the decode thread owns.
struct DecodeJob {
    session: SessionId,
    decoder: Decoder,
    resampling: Option<Resampling>,
    shared: Arc<DecodeShared>,
    sample_buffer: Arc<SampleBuffer>,
    events: EngineEvents,
}


impl DecodeJob {
    fn stopped( &self ) -> bool {
        self.shared.stop.load( Ordering::Relaxed )
    }


    fn run( mut self ) {
        let channels = self.decoder.channels().max( 1 );
        // Keep about 50ms decoded ahead of the device
        let target_buffer = self.decoder.sample_rate() as usize * channels / 20;

        while !self.stopped() {
            self.apply_seek();

            if self.sample_buffer.is_paused() {
                thread::sleep( Duration::from_millis( 10 ) );
                continue;
            }
            if self.sample_buffer.len() > target_buffer {
                thread::sleep( Duration::from_millis( 5 ) );
                continue;
            }

            match self.decoder.decode_next() {
                Ok( Some( samples ) ) => {
                    let samples = match self.resampling.as_mut() {
                        Some( r ) => r.process( &samples ),
                        None => samples,
                    };
                    self.feed( &samples );
                }
                Ok( None ) => {
                    let tail = self.resampling.as_mut().map( Resampling::flush ).unwrap_or_default();
                    self.feed( &tail );
                    while !self.sample_buffer.is_empty() && !self.stopped() {
                        thread::sleep( Duration::from_millis( 10 ) );
                    }
                    if !self.stopped() {
                        tracing::info!( "Reached end of source ({})", self.session );
                        let _ = self.events.send( EngineEvent::Finished { session: self.session } );
                    }
                    break;
                }
                Err( e ) => {
                    tracing::error!( "Decode error ({}): {}", self.session, e );
                    if !self.stopped() {
                        let _ = self.events.send( EngineEvent::Error { session: self.session, reason: e.to_string() } );
                    }
                    break;
                }
            }
        }

        tracing::debug!( "Decode thread exiting ({})", self.session );
    }


    fn apply_seek( &mut self ) {
        let request = self.shared.seek_request.lock().unwrap_or_else( PoisonError::into_inner ).take();
        let Some( position ) = request else {
            return;
        };

        match self.decoder.seek( position ) {
            Ok(()) => {
                *self.shared.position_base.lock().unwrap_or_else( PoisonError::into_inner ) = position;
                self.sample_buffer.clear();
                if let Some( r ) = self.resampling.as_mut() {
                    r.clear();
                }
                tracing::info!( "Seeked to {:?} ({})", position, self.session );
            }
            Err( e ) => tracing::warn!( "Seek failed ({}): {}", self.session, e ),
        }
    }


    /// Pushes into the device buffer, waiting for room.
    fn feed( &self, samples: &[f32] ) {
        let mut offset = 0;
        while offset < samples.len() && !self.stopped() {
            let pushed = self.sample_buffer.push( &samples[ offset.. ] );
            offset += pushed;
            if pushed == 0 {
                thread::sleep( Duration::from_millis( 5 ) );
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use tokio::sync::mpsc;


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ -1.0, -2.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, -1.0, 2.0, -2.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_played_position_uses_device_rate() {
        let base = Duration::from_secs( 30 );
        assert_eq!( played_position( base, 0, 48_000 ), base );
        assert_eq!( played_position( base, 24_000, 48_000 ), Duration::from_millis( 30_500 ) );
        assert_eq!( played_position( Duration::ZERO, 44_100, 44_100 ), Duration::from_secs( 1 ) );
        assert_eq!( played_position( base, 100, 0 ), base );
    }


    #[test]
    fn test_prepare_missing_file_reports_error() {
        let ( tx, mut rx ) = mpsc::unbounded_channel();
        let mut engine = SymphoniaEngine::new( tx ).unwrap();
        let session = SessionId::default().next();

        engine.prepare( session, Path::new( "/no/such/track.mp3" ) );

        match rx.blocking_recv() {
            Some( EngineEvent::Error { session: got, .. } ) => assert_eq!( got, session ),
            other => panic!( "expected error event, got {:?}", other ),
        }
        assert!( matches!( engine.start(), Err( EngineError::NotPrepared ) ) );
    }


    #[test]
    fn test_idle_engine_rejects_transport_calls() {
        let ( tx, _rx ) = mpsc::unbounded_channel();
        let mut engine = SymphoniaEngine::new( tx ).unwrap();

        assert!( matches!( engine.pause(), Err( EngineError::NotPlaying ) ) );
        assert!( matches!( engine.seek_to( Duration::from_secs( 1 ) ), Err( EngineError::NotPlaying ) ) );
        assert_eq!( engine.position(), Duration::ZERO );
        assert_eq!( engine.duration(), None );
    }
}
