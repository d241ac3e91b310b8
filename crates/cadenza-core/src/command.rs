//! Transport commands
//!
//! Every way of driving playback (keys, slash commands, OS media buttons)
//! ends up as a [`Command`] sent to the player service. Slash commands are
//! parsed here so every front end shares one vocabulary.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::{ Catalog, TrackId };


/// Errors that can occur while parsing a command.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// A request to the transport.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    /// Select and prepare a catalog track.
    Play( TrackId ),
    Pause,
    Resume,
    /// Pause if playing, resume if paused.
    Toggle,
    SkipNext,
    SkipPrevious,
    SetShuffle( bool ),
    /// Flip shuffle relative to the current mode.
    ToggleShuffle,
    CycleRepeat,
    SeekTo( Duration ),
    /// Drop the engine source and go idle.
    Stop,
    /// Replace the catalog the queue is built from.
    LoadCatalog( Catalog ),
}


impl Command {
    /// Parses a slash command (without the leading `/`).
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( str::trim ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "play" | "p" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "path".into() ) )?;
                Ok( Command::Play( TrackId::from_path( Path::new( path ) ) ) )
            }
            "pause" | "pa" => Ok( Command::Pause ),
            "resume" | "res" => Ok( Command::Resume ),
            "toggle" | "t" => Ok( Command::Toggle ),
            "next" | "n" => Ok( Command::SkipNext ),
            "prev" | "previous" | "pr" => Ok( Command::SkipPrevious ),
            "shuffle" | "sh" => match args.map( str::to_lowercase ).as_deref() {
                None => Ok( Command::ToggleShuffle ),
                Some( "on" | "1" | "true" ) => Ok( Command::SetShuffle( true ) ),
                Some( "off" | "0" | "false" ) => Ok( Command::SetShuffle( false ) ),
                Some( other ) => Err( CommandError::InvalidArgument(
                    format!( "Invalid shuffle setting: '{}'. Use 'on' or 'off'", other )
                )),
            },
            "repeat" | "rep" => Ok( Command::CycleRepeat ),
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                Ok( Command::SeekTo( parse_time( time_str )? ) )
            }
            "stop" | "st" => Ok( Command::Stop ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Play( _ ) => "Play a track",
            Command::Pause => "Pause playback",
            Command::Resume => "Resume playback",
            Command::Toggle => "Toggle play/pause",
            Command::SkipNext => "Next track",
            Command::SkipPrevious => "Previous track",
            Command::SetShuffle( _ ) => "Set shuffle",
            Command::ToggleShuffle => "Toggle shuffle",
            Command::CycleRepeat => "Cycle repeat mode",
            Command::SeekTo( _ ) => "Seek to position",
            Command::Stop => "Stop playback",
            Command::LoadCatalog( _ ) => "Reload the library",
        }
    }
}


/// Parses a time string like "1:30" or "90" into a Duration.
///
/// @param s - Time string in format "MM:SS", "M:SS", or just seconds
///
/// @returns Duration or error
pub fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: u64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        if seconds >= 60 {
            return Err( CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) );
        }
        let total = minutes.checked_mul( 60 )
            .and_then( |m| m.checked_add( seconds ) )
            .ok_or_else( || CommandError::InvalidArgument( format!( "Time out of range: {}", s ) ) )?;
        Ok( Duration::from_secs( total ) )
    } else {
        let seconds: u64 = s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        Ok( Duration::from_secs( seconds ) )
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Playback Commands:
  /play <path>        Play a library track       [Enter]
  /pause              Pause playback
  /resume             Resume playback
  /toggle             Toggle play/pause          [Space]
  /next               Next track                 [n]
  /prev               Previous track             [p]
  /seek <time>        Seek to position (1:30)    [Left/Right]
  /stop               Stop playback

Queue Commands:
  /shuffle [on|off]   Set or toggle shuffle      [s]
  /repeat             Cycle repeat off/one/all   [r]

Other Commands:
  /find <term>        Filter the track list      [f]
  /rescan             Reload the library
  /help               Show this help             [?]
  /quit               Exit cadenza               [q]"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play() {
        let cmd = Command::parse( "play /music/a.mp3" ).unwrap();
        assert_eq!( cmd, Command::Play( TrackId::from_path( Path::new( "/music/a.mp3" ) ) ) );
    }


    #[test]
    fn test_parse_aliases() {
        assert_eq!( Command::parse( "n" ).unwrap(), Command::SkipNext );
        assert_eq!( Command::parse( "previous" ).unwrap(), Command::SkipPrevious );
        assert_eq!( Command::parse( "  PAUSE " ).unwrap(), Command::Pause );
        assert_eq!( Command::parse( "rep" ).unwrap(), Command::CycleRepeat );
    }


    #[test]
    fn test_parse_shuffle() {
        assert_eq!( Command::parse( "shuffle" ).unwrap(), Command::ToggleShuffle );
        assert_eq!( Command::parse( "shuffle on" ).unwrap(), Command::SetShuffle( true ) );
        assert_eq!( Command::parse( "sh OFF" ).unwrap(), Command::SetShuffle( false ) );
        assert!( matches!( Command::parse( "shuffle maybe" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_seek() {
        assert_eq!( Command::parse( "seek 1:30" ).unwrap(), Command::SeekTo( Duration::from_secs( 90 ) ) );
        assert_eq!( Command::parse( "sk 45" ).unwrap(), Command::SeekTo( Duration::from_secs( 45 ) ) );
    }


    #[test]
    fn test_parse_time_rejects_bad_seconds() {
        assert!( parse_time( "1:75" ).is_err() );
        assert!( parse_time( "abc" ).is_err() );
    }


    #[test]
    fn test_parse_time_rejects_overflowing_minutes() {
        assert!( matches!( parse_time( "307445734561825861:00" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "seek 307445734561825861:00" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert_eq!( parse_time( "307445734561825860:15" ).unwrap(), Duration::from_secs( 307445734561825860 * 60 + 15 ) );
    }


    #[test]
    fn test_parse_unknown() {
        assert!( matches!( Command::parse( "foobar" ), Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "" ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert_eq!( Command::parse( "play" ), Err( CommandError::MissingArgument( "path".into() ) ) );
        assert!( matches!( Command::parse( "seek" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
