//! Log file setup
//!
//! The terminal belongs to the UI, so logs go to a file.

use std::fs::{ self, OpenOptions };
use std::path::{ Path, PathBuf };
use std::sync::Mutex;

use anyhow::{ anyhow, Context, Result };
use tracing_subscriber::EnvFilter;


/// Default log location under the user's data directory.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map( |p| p.join( "cadenza" ).join( "cadenza.log" ) )
}


/// Installs the global subscriber writing to `path`.
///
/// `RUST_LOG` selects the filter; the default is `info`.
///
/// @param path - Log file, appended to and created with its directory
pub fn init( path: &Path ) -> Result<()> {
    if let Some( parent ) = path.parent() {
        fs::create_dir_all( parent )
            .with_context( || format!( "creating log directory {}", parent.display() ) )?;
    }

    let file = OpenOptions::new()
        .create( true )
        .append( true )
        .open( path )
        .with_context( || format!( "opening log file {}", path.display() ) )?;

    tracing_subscriber::fmt()
        .with_env_filter( EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "info" ) ) )
        .with_writer( Mutex::new( file ) )
        .with_ansi( false )
        .try_init()
        .map_err( |e| anyhow!( "installing log subscriber: {}", e ) )?;

    tracing::info!( "Cadenza {} starting", env!( "CARGO_PKG_VERSION" ) );
    Ok(())
}
