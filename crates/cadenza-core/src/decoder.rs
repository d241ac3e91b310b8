//! Audio decoding via Symphonia
//!
//! Opens sources for the playback engine and reads the title/artist tags
//! the catalog shows.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::{ MetadataOptions, StandardTagKey, Tag };
use symphonia::core::probe::{ Hint, ProbeResult };
use symphonia::core::units::Time;
use thiserror::Error;


/// Errors that can occur while opening or decoding a source.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Descriptive tags read from a source file.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
}


/// Probes a file and hands back the format reader plus any container metadata.
fn probe( path: &Path ) -> Result<ProbeResult, DecoderError> {
    let file = File::open( path )?;
    let mss = MediaSourceStream::new(
        Box::new( file ),
        MediaSourceStreamOptions { buffer_len: 64 * 1024 },
    );

    let mut hint = Hint::new();
    if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
        hint.with_extension( ext );
    }

    symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
        .map_err( |_| DecoderError::UnsupportedFormat )
}


/// Reads title and artist tags without creating a decoder.
///
/// Probe-level tags (ID3 and friends) win over tags embedded in the container.
pub fn read_tags( path: &Path ) -> Result<TrackTags, DecoderError> {
    let mut probed = probe( path )?;
    let mut tags = TrackTags::default();

    let mut absorb = |found: &[Tag]| {
        for tag in found {
            let value = tag.value.to_string();
            match tag.std_key {
                Some( StandardTagKey::TrackTitle ) if tags.title.is_none() => tags.title = Some( value ),
                Some( StandardTagKey::Artist ) if tags.artist.is_none() => tags.artist = Some( value ),
                _ => {}
            }
        }
    };

    if let Some( log ) = probed.metadata.get() {
        if let Some( rev ) = log.current() {
            absorb( rev.tags() );
        }
    }
    if let Some( rev ) = probed.format.metadata().current() {
        absorb( rev.tags() );
    }

    Ok( tags )
}


/// Audio decoder wrapper around Symphonia.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    duration: Option<Duration>,
}


impl Decoder {
    /// Opens an audio file for decoding.
    pub fn open( path: &Path ) -> Result<Self, DecoderError> {
        let format_reader = probe( path )?.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;
        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let duration = codec_params.n_frames
            .map( |frames| Duration::from_secs_f64( frames as f64 / sample_rate as f64 ) );

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        tracing::info!(
            "Opened {:?}: {} Hz, {} channels, duration {:?}",
            path,
            sample_rate,
            channels,
            duration
        );

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            duration,
        })
    }


    /// Returns the sample rate of the audio.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    /// Returns the number of channels.
    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Returns the total duration, if the container reports one.
    pub fn duration( &self ) -> Option<Duration> {
        self.duration
    }


    /// Decodes the next packet and returns interleaved f32 samples.
    ///
    /// Returns None when EOF is reached.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) )
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok( None );
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // Corrupt packets are skipped, not fatal
                Err( SymphoniaError::DecodeError( _ ) ) => continue,
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            let frames = decoded.frames();
            if self.sample_buf.as_ref().map_or( true, |b| b.capacity() < frames ) {
                self.sample_buf = Some( SampleBuffer::new( frames as u64, *decoded.spec() ) );
            }
            let Some( buf ) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref( decoded );

            return Ok( Some( buf.samples().to_vec() ) );
        }
    }


    /// Seeks to an absolute position in the track.
    pub fn seek( &mut self, position: Duration ) -> Result<(), DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from( position.as_secs_f64() ),
            track_id: Some( self.track_id ),
        };

        self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecoderError::Seek( e.to_string() ) )?;

        self.decoder.reset();
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_open_missing_file() {
        let result = Decoder::open( Path::new( "/definitely/not/here.flac" ) );
        assert!( matches!( result, Err( DecoderError::FileOpen( _ ) ) ) );
    }


    #[test]
    fn test_read_tags_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "fake.mp3" );
        std::fs::write( &path, b"this is not audio" ).unwrap();

        assert!( read_tags( &path ).is_err() );
    }
}
