//! Audio output via cpal
//!
//! Sends decoded PCM samples to the system audio device.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Queue between the decode thread and the device callback.
///
/// Converts the source channel layout to the device layout on the way out.
pub struct SampleBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    // Device frames handed to the callback since the last clear
    frames_played: AtomicU64,
    source_channels: usize,
    output_channels: usize,
}


impl SampleBuffer {
    /// @param capacity - Maximum number of buffered source samples
    /// @param source_channels - Channels produced by the decoder
    /// @param output_channels - Channels expected by the device
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            frames_played: AtomicU64::new( 0 ),
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
        }
    }


    fn lock( &self ) -> MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else( PoisonError::into_inner )
    }


    /// Pushes as many samples as fit and returns how many were taken.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut buf = self.lock();
        let take = samples.len().min( self.capacity.saturating_sub( buf.len() ) );
        buf.extend( &samples[ ..take ] );
        take
    }


    /// Fills `output` with whole device frames, padding with silence.
    ///
    /// Returns the number of samples written from the buffer.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        if self.paused.load( Ordering::Relaxed ) {
            output.fill( 0.0 );
            return 0;
        }

        let src = self.source_channels;
        let out = self.output_channels;
        let mut buf = self.lock();
        let frames = ( output.len() / out ).min( buf.len() / src );

        let mut frame = vec![ 0.0f32; src ];
        for dest in output.chunks_exact_mut( out ).take( frames ) {
            for sample in frame.iter_mut() {
                *sample = buf.pop_front().unwrap_or( 0.0 );
            }
            remix( &frame, dest );
        }
        self.frames_played.fetch_add( frames as u64, Ordering::Relaxed );
        drop( buf );

        output[ frames * out.. ].fill( 0.0 );
        frames * out
    }


    pub fn len( &self ) -> usize {
        self.lock().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.lock().is_empty()
    }


    /// Drops buffered audio and restarts the played-frame count.
    pub fn clear( &self ) {
        let mut buf = self.lock();
        buf.clear();
        self.frames_played.store( 0, Ordering::Relaxed );
    }


    /// Frames actually sent to the device since the last clear.
    pub fn frames_played( &self ) -> u64 {
        self.frames_played.load( Ordering::Relaxed )
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }
}


/// Maps one source frame onto one device frame.
///
/// Stereo to mono averages; otherwise channels are copied and the last
/// source channel fills any extra device channels.
fn remix( src: &[f32], dest: &mut [f32] ) {
    if src.len() == 2 && dest.len() == 1 {
        dest[ 0 ] = ( src[ 0 ] + src[ 1 ] ) * 0.5;
        return;
    }

    let last = src.last().copied().unwrap_or( 0.0 );
    for ( ch, sample ) in dest.iter_mut().enumerate() {
        *sample = src.get( ch ).copied().unwrap_or( last );
    }
}


/// Audio output handler.
///
/// Not Send: cpal streams must stay on the thread that built them.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}


impl AudioOutput {
    /// Opens the default device for a source format.
    ///
    /// Returns the output and the buffer the decode thread should feed.
    pub fn new(
        source_sample_rate: u32,
        source_channels: u16,
    ) -> Result<( Self, Arc<SampleBuffer> ), OutputError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or( OutputError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();

        let rate_fits = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate && c.max_sample_rate().0 >= source_sample_rate
        };

        // Prefer exact channels + rate, then any channels at the rate, then the default
        let config = match supported.iter()
            .find( |c| c.channels() == source_channels && rate_fits( c ) )
            .or_else( || supported.iter().find( |c| rate_fits( c ) ) )
        {
            Some( range ) => range.clone()
                .with_sample_rate( cpal::SampleRate( source_sample_rate ) )
                .config(),
            None => {
                let fallback = device
                    .default_output_config()
                    .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?;
                tracing::info!(
                    "Device cannot run at {} Hz, using {} Hz and resampling",
                    source_sample_rate,
                    fallback.sample_rate().0
                );
                fallback.config()
            }
        };

        tracing::info!(
            "Audio output config: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        // Roughly half a second of source audio
        let capacity = source_sample_rate as usize * source_channels as usize / 2;
        let sample_buffer = Arc::new( SampleBuffer::new( capacity, source_channels, config.channels ) );
        let callback_buffer = Arc::clone( &sample_buffer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_buffer.pop( data );
                },
                |err| tracing::error!( "Audio output error: {}", err ),
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok(( Self { stream, sample_rate: config.sample_rate.0 }, sample_buffer ))
    }


    /// Starts the device stream.
    pub fn play( &self ) -> Result<(), OutputError> {
        self.stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Actual device sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_push_respects_capacity() {
        let buffer = SampleBuffer::new( 4, 2, 2 );
        assert_eq!( buffer.push( &[ 0.1, 0.2, 0.3 ] ), 3 );
        assert_eq!( buffer.push( &[ 0.4, 0.5, 0.6 ] ), 1 );
        assert_eq!( buffer.len(), 4 );
    }


    #[test]
    fn test_mono_to_stereo_duplicates() {
        let buffer = SampleBuffer::new( 16, 1, 2 );
        buffer.push( &[ 0.25, -0.5 ] );

        let mut out = [ 9.0f32; 6 ];
        assert_eq!( buffer.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.25, 0.25, -0.5, -0.5, 0.0, 0.0 ] );
    }


    #[test]
    fn test_stereo_to_mono_averages() {
        let buffer = SampleBuffer::new( 16, 2, 1 );
        buffer.push( &[ 1.0, 0.0, 0.5, 0.5 ] );

        let mut out = [ 0.0f32; 2 ];
        buffer.pop( &mut out );
        assert_eq!( out, [ 0.5, 0.5 ] );
    }


    #[test]
    fn test_paused_buffer_outputs_silence() {
        let buffer = SampleBuffer::new( 16, 2, 2 );
        buffer.push( &[ 0.7, 0.7 ] );
        buffer.set_paused( true );

        let mut out = [ 1.0f32; 2 ];
        assert_eq!( buffer.pop( &mut out ), 0 );
        assert_eq!( out, [ 0.0, 0.0 ] );
        assert_eq!( buffer.len(), 2 );
        assert_eq!( buffer.frames_played(), 0 );
    }


    #[test]
    fn test_frames_played_counts_only_consumed_audio() {
        let buffer = SampleBuffer::new( 16, 2, 2 );
        buffer.push( &[ 0.1, 0.1, 0.2, 0.2, 0.3, 0.3 ] );
        assert_eq!( buffer.frames_played(), 0 );

        let mut out = [ 0.0f32; 4 ];
        buffer.pop( &mut out );
        assert_eq!( buffer.frames_played(), 2 );

        // Underrun pads with silence without counting it
        let mut out = [ 0.0f32; 8 ];
        buffer.pop( &mut out );
        assert_eq!( buffer.frames_played(), 3 );

        buffer.clear();
        assert_eq!( buffer.frames_played(), 0 );
    }
}
