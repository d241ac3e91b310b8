//! Command-line argument parsing for Cadenza.

use std::path::PathBuf;

use clap::Parser;


/// Cadenza - A terminal music player for your library folders.
#[derive( Parser, Debug )]
#[command( name = "cadenza" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Library folders to scan. Overrides the saved library roots.
    pub roots: Vec<PathBuf>,

    /// Fixed shuffle seed, for reproducible shuffle order.
    #[arg( long )]
    pub seed: Option<u64>,

    /// Write the log here instead of the default data directory.
    #[arg( long )]
    pub log_file: Option<PathBuf>,

    /// Give up on a track that takes longer than this many seconds to open.
    #[arg( long, value_name = "SECS" )]
    pub prepare_timeout: Option<u64>,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_roots_and_flags() {
        let args = Args::parse_from([ "cadenza", "/music", "/more", "--seed", "9", "--prepare-timeout", "15" ]);
        assert_eq!( args.roots, vec![ PathBuf::from( "/music" ), PathBuf::from( "/more" ) ] );
        assert_eq!( args.seed, Some( 9 ) );
        assert_eq!( args.prepare_timeout, Some( 15 ) );
        assert!( args.log_file.is_none() );
    }


    #[test]
    fn test_no_arguments() {
        let args = Args::parse_from([ "cadenza" ]);
        assert!( args.roots.is_empty() );
        assert!( args.seed.is_none() );
    }
}
