//! Track catalog
//!
//! Discovers audio files under library roots and turns them into immutable
//! track records. A catalog is replaced wholesale on every reload.

use std::collections::HashMap;
use std::fmt;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::decoder;


/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "aiff", "alac",
];

/// Preferred artwork file stems, checked case-insensitively.
const ART_NAMES: &[&str] = &[ "cover", "folder", "album", "front", "albumart" ];

const ART_EXTENSIONS: &[&str] = &[ "jpg", "jpeg", "png", "bmp", "gif" ];

const UNKNOWN_ARTIST: &str = "Unknown artist";


/// Errors that can occur while scanning library roots.
#[derive( Debug, Error )]
pub enum CatalogError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),
}


/// Stable identity of a track, derived from its source path.
#[derive( Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord )]
pub struct TrackId( String );


impl TrackId {
    /// Derives the id for a source path.
    pub fn from_path( path: &Path ) -> Self {
        Self( path.to_string_lossy().into_owned() )
    }


    pub fn as_str( &self ) -> &str {
        &self.0
    }
}


impl fmt::Display for TrackId {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( &self.0 )
    }
}


/// A single playable track. Immutable once built.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct TrackRecord {
    id: TrackId,
    title: String,
    artist: String,
    source_path: PathBuf,
    artwork: Option<PathBuf>,
}


impl TrackRecord {
    /// Creates a record; the id comes from `source_path`.
    pub fn new( source_path: impl Into<PathBuf>, title: impl Into<String>, artist: impl Into<String> ) -> Self {
        let source_path = source_path.into();
        Self {
            id: TrackId::from_path( &source_path ),
            title: title.into(),
            artist: artist.into(),
            source_path,
            artwork: None,
        }
    }


    /// Attaches an artwork reference.
    pub fn with_artwork( mut self, artwork: impl Into<PathBuf> ) -> Self {
        self.artwork = Some( artwork.into() );
        self
    }


    pub fn id( &self ) -> &TrackId {
        &self.id
    }


    pub fn title( &self ) -> &str {
        &self.title
    }


    pub fn artist( &self ) -> &str {
        &self.artist
    }


    pub fn source_path( &self ) -> &Path {
        &self.source_path
    }


    pub fn artwork( &self ) -> Option<&Path> {
        self.artwork.as_deref()
    }


    /// Case-insensitive substring match on title or artist.
    ///
    /// @param needle - Already lowercased search term
    fn matches( &self, needle: &str ) -> bool {
        self.title.to_lowercase().contains( needle )
            || self.artist.to_lowercase().contains( needle )
    }
}


/// Ordered set of tracks from one load. Ids are unique within a catalog.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct Catalog {
    tracks: Vec<Arc<TrackRecord>>,
    index: HashMap<TrackId, usize>,
}


impl Catalog {
    /// Builds a catalog, keeping the first record of any duplicated id.
    pub fn new( records: impl IntoIterator<Item = TrackRecord> ) -> Self {
        let mut catalog = Self::default();

        for record in records {
            if catalog.index.contains_key( record.id() ) {
                tracing::debug!( "Skipping duplicate track {}", record.id() );
                continue;
            }
            catalog.index.insert( record.id().clone(), catalog.tracks.len() );
            catalog.tracks.push( Arc::new( record ) );
        }

        catalog
    }


    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }


    /// Gets the track at a catalog index.
    pub fn get( &self, index: usize ) -> Option<&Arc<TrackRecord>> {
        self.tracks.get( index )
    }


    /// Gets a track by id.
    pub fn find( &self, id: &TrackId ) -> Option<&Arc<TrackRecord>> {
        self.position_of( id ).and_then( |i| self.tracks.get( i ) )
    }


    /// Gets the catalog index of a track id.
    pub fn position_of( &self, id: &TrackId ) -> Option<usize> {
        self.index.get( id ).copied()
    }


    pub fn iter( &self ) -> impl Iterator<Item = &Arc<TrackRecord>> {
        self.tracks.iter()
    }


    /// Track ids in catalog order.
    pub fn ids( &self ) -> impl Iterator<Item = &TrackId> {
        self.tracks.iter().map( |t| t.id() )
    }


    /// Filters by title or artist, keeping catalog order.
    ///
    /// A blank term matches everything.
    pub fn search( &self, term: &str ) -> Vec<Arc<TrackRecord>> {
        let needle = term.trim().to_lowercase();
        self.tracks
            .iter()
            .filter( |t| needle.is_empty() || t.matches( &needle ) )
            .cloned()
            .collect()
    }
}


/// Source of track records for the queue.
///
/// Failures are absorbed by the provider and reported as an empty list.
pub trait CatalogProvider {
    fn load_catalog( &self ) -> Vec<TrackRecord>;
}


impl CatalogProvider for Vec<TrackRecord> {
    fn load_catalog( &self ) -> Vec<TrackRecord> {
        self.clone()
    }
}


/// Scans directories on local storage for audio files.
#[derive( Debug, Clone, Default )]
pub struct DirectoryCatalog {
    roots: Vec<PathBuf>,
}


impl DirectoryCatalog {
    /// Creates a provider with no roots.
    pub fn new() -> Self {
        Self::default()
    }


    /// Adds a root directory to scan. Duplicates are ignored.
    pub fn add_root( &mut self, path: PathBuf ) {
        if !self.roots.contains( &path ) {
            self.roots.push( path );
        }
    }


    pub fn roots( &self ) -> &[PathBuf] {
        &self.roots
    }


    /// Scans every root, oldest file first.
    ///
    /// A root that cannot be read is skipped; the others still load. Fails
    /// only when roots are configured and none of them could be read.
    pub fn scan( &self ) -> Result<Vec<TrackRecord>, CatalogError> {
        let mut found = Vec::new();
        let mut last_error = None;
        let mut scanned = 0;
        for root in &self.roots {
            tracing::info!( "Scanning: {:?}", root );
            match scan_recursive( root, &mut found ) {
                Ok(()) => scanned += 1,
                Err( e ) => {
                    tracing::warn!( "Skipping library root {:?}: {}", root, e );
                    last_error = Some( e );
                }
            }
        }
        if scanned == 0 {
            if let Some( e ) = last_error {
                return Err( e );
            }
        }

        found.sort_by( |( a_path, a_time ), ( b_path, b_time )| {
            a_time.cmp( b_time ).then_with( || a_path.cmp( b_path ) )
        });

        let mut artwork_cache: HashMap<PathBuf, Option<PathBuf>> = HashMap::new();
        let records: Vec<TrackRecord> = found
            .into_iter()
            .map( |( path, _ )| {
                let artwork = path.parent().and_then( |dir| {
                    artwork_cache
                        .entry( dir.to_path_buf() )
                        .or_insert_with( || find_artwork( dir ) )
                        .clone()
                });
                build_record( path, artwork )
            })
            .collect();

        tracing::info!( "Found {} tracks", records.len() );
        Ok( records )
    }
}


impl CatalogProvider for DirectoryCatalog {
    fn load_catalog( &self ) -> Vec<TrackRecord> {
        match self.scan() {
            Ok( records ) => records,
            Err( e ) => {
                tracing::warn!( "Library scan failed: {}", e );
                Vec::new()
            }
        }
    }
}


fn scan_recursive( dir: &Path, found: &mut Vec<( PathBuf, SystemTime )> ) -> Result<(), CatalogError> {
    let entries = match std::fs::read_dir( dir ) {
        Ok( e ) => e,
        Err( e ) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            tracing::warn!( "Access denied: {:?}", dir );
            return Ok(());
        }
        Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err( CatalogError::NotFound( dir.to_path_buf() ) );
        }
        Err( e ) => return Err( CatalogError::Io( e ) ),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok( t ) => t,
            Err( e ) => {
                tracing::warn!( "Cannot stat {:?}: {}", path, e );
                continue;
            }
        };

        if file_type.is_dir() {
            // Removed mid-scan loses only this subtree
            if let Err( e ) = scan_recursive( &path, found ) {
                tracing::warn!( "Skipping {:?}: {}", path, e );
            }
        } else if file_type.is_symlink() && path.is_dir() {
            tracing::debug!( "Not following directory link {:?}", path );
        } else if has_extension( &path, SUPPORTED_EXTENSIONS ) {
            let modified = entry.metadata()
                .and_then( |m| m.modified() )
                .unwrap_or( SystemTime::UNIX_EPOCH );
            found.push(( path, modified ));
        }
    }

    Ok(())
}


/// Builds a record from tags, falling back to the file name.
fn build_record( path: PathBuf, artwork: Option<PathBuf> ) -> TrackRecord {
    let tags = decoder::read_tags( &path ).unwrap_or_else( |e| {
        tracing::debug!( "No tags for {:?}: {}", path, e );
        decoder::TrackTags::default()
    });

    let title = tags.title.unwrap_or_else( || {
        path.file_stem()
            .map( |s| s.to_string_lossy().into_owned() )
            .unwrap_or_else( || path.to_string_lossy().into_owned() )
    });
    let artist = tags.artist.unwrap_or_else( || UNKNOWN_ARTIST.to_string() );

    let record = TrackRecord::new( path, title, artist );
    match artwork {
        Some( art ) => record.with_artwork( art ),
        None => record,
    }
}


/// Finds cover art in a directory; a well-known name wins over any other image.
fn find_artwork( dir: &Path ) -> Option<PathBuf> {
    let entries = match std::fs::read_dir( dir ) {
        Ok( e ) => e,
        Err( e ) => {
            tracing::warn!( "Failed to read directory {:?}: {}", dir, e );
            return None;
        }
    };

    let mut images: Vec<PathBuf> = entries
        .flatten()
        .map( |e| e.path() )
        .filter( |p| has_extension( p, ART_EXTENSIONS ) )
        .collect();
    images.sort();

    let preferred = images.iter().find( |p| {
        p.file_stem()
            .and_then( |s| s.to_str() )
            .map( |s| ART_NAMES.contains( &s.to_lowercase().as_str() ) )
            .unwrap_or( false )
    });

    preferred.or( images.first() ).cloned()
}


fn has_extension( path: &Path, allowed: &[&str] ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| allowed.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::fs::{ self, File };
    use std::time::Duration;


    fn touch( path: &Path, modified: SystemTime ) {
        fs::write( path, b"" ).unwrap();
        File::options().write( true ).open( path ).unwrap().set_modified( modified ).unwrap();
    }


    #[test]
    fn test_catalog_dedups_by_path() {
        let catalog = Catalog::new( vec![
            TrackRecord::new( "/music/a.mp3", "A", "X" ),
            TrackRecord::new( "/music/b.mp3", "B", "Y" ),
            TrackRecord::new( "/music/a.mp3", "A again", "X" ),
        ]);

        assert_eq!( catalog.len(), 2 );
        assert_eq!( catalog.get( 0 ).unwrap().title(), "A" );
        assert_eq!( catalog.position_of( &TrackId::from_path( Path::new( "/music/b.mp3" ) ) ), Some( 1 ) );
    }


    #[test]
    fn test_search_matches_title_or_artist() {
        let catalog = Catalog::new( vec![
            TrackRecord::new( "/m/1.mp3", "Blue Monday", "New Order" ),
            TrackRecord::new( "/m/2.mp3", "Atmosphere", "Joy Division" ),
            TrackRecord::new( "/m/3.mp3", "Ceremony", "New Order" ),
        ]);

        let hits: Vec<_> = catalog.search( "new order" ).iter().map( |t| t.title().to_string() ).collect();
        assert_eq!( hits, vec![ "Blue Monday", "Ceremony" ] );

        assert_eq!( catalog.search( "ATMO" ).len(), 1 );
        assert_eq!( catalog.search( "   " ).len(), 3 );
        assert!( catalog.search( "kraftwerk" ).is_empty() );
    }


    #[test]
    fn test_scan_orders_by_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join( "album" );
        fs::create_dir( &nested ).unwrap();

        let base = SystemTime::UNIX_EPOCH + Duration::from_secs( 1_600_000_000 );
        touch( &dir.path().join( "newest.mp3" ), base + Duration::from_secs( 300 ) );
        touch( &nested.join( "oldest.flac" ), base );
        touch( &dir.path().join( "middle.ogg" ), base + Duration::from_secs( 100 ) );
        touch( &dir.path().join( "notes.txt" ), base );

        let mut provider = DirectoryCatalog::new();
        provider.add_root( dir.path().to_path_buf() );
        let records = provider.scan().unwrap();

        let titles: Vec<_> = records.iter().map( |r| r.title() ).collect();
        assert_eq!( titles, vec![ "oldest", "middle", "newest" ] );
        assert!( records.iter().all( |r| r.artist() == UNKNOWN_ARTIST ) );
    }


    #[test]
    fn test_scan_attaches_preferred_artwork() {
        let dir = tempfile::tempdir().unwrap();
        fs::write( dir.path().join( "a.mp3" ), b"" ).unwrap();
        fs::write( dir.path().join( "aaa_scan.png" ), b"" ).unwrap();
        fs::write( dir.path().join( "Cover.JPG" ), b"" ).unwrap();

        let mut provider = DirectoryCatalog::new();
        provider.add_root( dir.path().to_path_buf() );
        let records = provider.load_catalog();

        assert_eq!( records.len(), 1 );
        assert_eq!( records[ 0 ].artwork(), Some( dir.path().join( "Cover.JPG" ).as_path() ) );
    }


    #[test]
    fn test_missing_root_does_not_hide_other_roots() {
        let dir = tempfile::tempdir().unwrap();
        fs::write( dir.path().join( "song.mp3" ), b"" ).unwrap();

        let mut provider = DirectoryCatalog::new();
        provider.add_root( PathBuf::from( "/no/such/library" ) );
        provider.add_root( dir.path().to_path_buf() );

        let records = provider.load_catalog();
        assert_eq!( records.len(), 1 );
        assert_eq!( records[ 0 ].title(), "song" );
        assert_eq!( provider.scan().unwrap().len(), 1 );
    }


    #[cfg( unix )]
    #[test]
    fn test_scan_does_not_follow_directory_links() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join( "album" );
        fs::create_dir( &album ).unwrap();
        fs::write( album.join( "track.flac" ), b"" ).unwrap();
        fs::write( dir.path().join( "single.mp3" ), b"" ).unwrap();
        std::os::unix::fs::symlink( dir.path(), album.join( "loop" ) ).unwrap();
        std::os::unix::fs::symlink( dir.path().join( "single.mp3" ), album.join( "linked.mp3" ) ).unwrap();

        let mut provider = DirectoryCatalog::new();
        provider.add_root( dir.path().to_path_buf() );

        let mut titles: Vec<_> = provider.scan().unwrap().iter().map( |r| r.title().to_string() ).collect();
        titles.sort();
        assert_eq!( titles, vec![ "linked", "single", "track" ] );
    }


    #[test]
    fn test_missing_root_yields_empty_catalog() {
        let mut provider = DirectoryCatalog::new();
        provider.add_root( PathBuf::from( "/no/such/library" ) );

        assert!( matches!( provider.scan(), Err( CatalogError::NotFound( _ ) ) ) );
        assert!( provider.load_catalog().is_empty() );
    }
}
