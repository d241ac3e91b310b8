//! Playback notifier
//!
//! Projects transport and queue state into the event the presentation layer
//! renders. Holds no state of its own.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::TrackRecord;
use crate::queue::{ PlaybackMode, QueueState };
use crate::transport::TransportState;


/// Coarse transport status for display.
#[derive( Debug, Clone, PartialEq, Eq, Default )]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Preparing,
    Playing,
    Paused,
    Error( String ),
}


/// Position within the current track, read from the engine.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub struct Progress {
    pub position: Duration,
    pub duration: Option<Duration>,
}


impl Progress {
    /// Played fraction in `0.0..=1.0`; zero when the duration is unknown.
    pub fn fraction( &self ) -> f64 {
        match self.duration {
            Some( total ) if !total.is_zero() => ( self.position.as_secs_f64() / total.as_secs_f64() ).min( 1.0 ),
            _ => 0.0,
        }
    }


    /// Elapsed time as `M:SS`.
    pub fn elapsed_label( &self ) -> String {
        format_time( self.position )
    }


    /// Remaining time as `-M:SS`, or `--:--` when the duration is unknown.
    pub fn remaining_label( &self ) -> String {
        match self.duration {
            Some( total ) => format!( "-{}", format_time( total.saturating_sub( self.position ) ) ),
            None => "--:--".to_string(),
        }
    }
}


/// Formats a duration as `M:SS`.
pub fn format_time( d: Duration ) -> String {
    let secs = d.as_secs();
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


/// What the presentation layer needs after a transport change.
#[derive( Debug, Clone, PartialEq, Default )]
pub struct NotifierEvent {
    pub track: Option<Arc<TrackRecord>>,
    pub is_playing: bool,
    pub status: PlaybackStatus,
    pub mode: PlaybackMode,
    pub queue_position: Option<usize>,
    pub queue_len: usize,
    pub progress: Option<Progress>,
}


/// Builds a [`NotifierEvent`].
///
/// @param state - Current transport state
/// @param queue - Current queue state
/// @param mode - Shuffle/repeat flags
/// @param progress - Engine position, when the caller polled it
pub fn project(
    state: &TransportState,
    queue: &QueueState,
    mode: PlaybackMode,
    progress: Option<Progress>,
) -> NotifierEvent {
    let status = match state {
        TransportState::Idle => PlaybackStatus::Idle,
        TransportState::Preparing( _ ) => PlaybackStatus::Preparing,
        TransportState::Playing( _ ) => PlaybackStatus::Playing,
        TransportState::Paused( _ ) => PlaybackStatus::Paused,
        TransportState::Error { reason, .. } => PlaybackStatus::Error( reason.clone() ),
    };

    NotifierEvent {
        track: state.track().cloned(),
        is_playing: state.is_playing(),
        status,
        mode,
        queue_position: queue.position(),
        queue_len: queue.len(),
        progress,
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::queue::RepeatMode;


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( Duration::from_secs( 0 ) ), "0:00" );
        assert_eq!( format_time( Duration::from_secs( 75 ) ), "1:15" );
        assert_eq!( format_time( Duration::from_millis( 3_599_999 ) ), "59:59" );
    }


    #[test]
    fn test_progress_labels() {
        let progress = Progress {
            position: Duration::from_secs( 30 ),
            duration: Some( Duration::from_secs( 200 ) ),
        };
        assert_eq!( progress.elapsed_label(), "0:30" );
        assert_eq!( progress.remaining_label(), "-2:50" );
        assert!( ( progress.fraction() - 0.15 ).abs() < 1e-9 );

        let unknown = Progress { position: Duration::from_secs( 5 ), duration: None };
        assert_eq!( unknown.remaining_label(), "--:--" );
        assert_eq!( unknown.fraction(), 0.0 );
    }


    #[test]
    fn test_project_carries_track_and_status() {
        let track = Arc::new( TrackRecord::new( "/m/a.mp3", "A", "Artist" ) );
        let mode = PlaybackMode { shuffle: true, repeat: RepeatMode::One };

        let event = project( &TransportState::Paused( Arc::clone( &track ) ), &QueueState::default(), mode, None );
        assert_eq!( event.track.as_deref(), Some( &*track ) );
        assert!( !event.is_playing );
        assert_eq!( event.status, PlaybackStatus::Paused );
        assert_eq!( event.mode, mode );

        let failed = TransportState::Error { track, reason: "bad header".into() };
        let event = project( &failed, &QueueState::default(), mode, None );
        assert_eq!( event.status, PlaybackStatus::Error( "bad header".into() ) );
    }


    #[test]
    fn test_project_idle() {
        let event = project( &TransportState::Idle, &QueueState::default(), PlaybackMode::default(), None );
        assert_eq!( event, NotifierEvent::default() );
    }
}
