//! Application settings management
//!
//! Persists the library roots, the playback mode and integration toggles
//! between runs.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };

use cadenza_core::{ PlaybackMode, RepeatMode };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Folders scanned for music
    pub library_roots: Vec<PathBuf>,

    pub shuffle: bool,

    /// Repeat mode: "off", "one" or "all"
    pub repeat: String,

    /// Seconds to wait for a track to open before giving up
    pub prepare_timeout_secs: Option<u64>,

    /// Enable System Media Transport Controls (Windows)
    pub media_controls_enabled: bool,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            library_roots: Vec::new(),
            shuffle: false,
            repeat: RepeatMode::Off.to_string(),
            prepare_timeout_secs: None,
            media_controls_enabled: true,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "cadenza" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from a specific file.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Ignoring malformed settings {}: {}", path.display(), e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to disk.
    pub fn save( &self ) {
        if let Some( path ) = Self::settings_path() {
            self.save_to( &path );
        }
    }


    /// Saves settings to a specific file, creating its directory.
    pub fn save_to( &self, path: &Path ) {
        if let Some( parent ) = path.parent() {
            if let Err( e ) = fs::create_dir_all( parent ) {
                tracing::warn!( "Failed to create settings directory: {}", e );
                return;
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Saved shuffle/repeat flags. An unknown repeat value reads as off.
    pub fn playback_mode( &self ) -> PlaybackMode {
        let repeat = self.repeat.parse().unwrap_or_else( |e| {
            tracing::warn!( "{}", e );
            RepeatMode::Off
        });
        PlaybackMode { shuffle: self.shuffle, repeat }
    }


    pub fn set_playback_mode( &mut self, mode: PlaybackMode ) {
        self.shuffle = mode.shuffle;
        self.repeat = mode.repeat.to_string();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );

        let mut settings = Settings {
            library_roots: vec![ PathBuf::from( "/music" ) ],
            prepare_timeout_secs: Some( 10 ),
            ..Settings::default()
        };
        settings.set_playback_mode( PlaybackMode { shuffle: true, repeat: RepeatMode::One } );
        settings.save_to( &path );

        let loaded = Settings::load_from( &path );
        assert_eq!( loaded, settings );
        assert_eq!( loaded.playback_mode(), PlaybackMode { shuffle: true, repeat: RepeatMode::One } );
    }


    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "shuffle": true }"# ).unwrap();

        let loaded = Settings::load_from( &path );
        assert!( loaded.shuffle );
        assert!( loaded.media_controls_enabled );
        assert_eq!( loaded.repeat, "off" );
    }


    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json" ).unwrap();

        assert_eq!( Settings::load_from( &path ), Settings::default() );
        assert_eq!( Settings::load_from( &dir.path().join( "absent.json" ) ), Settings::default() );
    }


    #[test]
    fn test_unknown_repeat_reads_as_off() {
        let settings = Settings { repeat: "forever".into(), ..Settings::default() };
        assert_eq!( settings.playback_mode().repeat, RepeatMode::Off );
    }
}
