//! Queue model
//!
//! Derives the effective play order from the catalog and the shuffle/repeat
//! mode, and decides which position plays next.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{ Rng, SeedableRng };

use crate::catalog::{ Catalog, TrackId, TrackRecord };


/// Repeat mode for the queue.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}


impl RepeatMode {
    /// Next mode in the button cycle: Off, One, All, Off.
    pub fn cycle( self ) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::Off,
        }
    }


    pub fn as_str( &self ) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }
}


impl fmt::Display for RepeatMode {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.as_str() )
    }
}


impl FromStr for RepeatMode {
    type Err = String;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Ok( RepeatMode::Off ),
            "one" | "1" => Ok( RepeatMode::One ),
            "all" | "2" => Ok( RepeatMode::All ),
            other => Err( format!( "Invalid repeat mode: '{}'. Use 'off', 'one', or 'all'", other ) ),
        }
    }
}


/// Shuffle and repeat flags.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub struct PlaybackMode {
    pub shuffle: bool,
    pub repeat: RepeatMode,
}


/// Why the queue is being advanced.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum AdvanceReason {
    /// The user pressed next.
    Manual,
    /// The engine finished the current track on its own.
    AutoCompletion,
}


/// Effective play order and the current position within it.
///
/// `position` is either `None` or a valid index into `order`.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct QueueState {
    order: Vec<TrackId>,
    position: Option<usize>,
}


impl QueueState {
    pub fn order( &self ) -> &[TrackId] {
        &self.order
    }


    pub fn position( &self ) -> Option<usize> {
        self.position
    }


    pub fn len( &self ) -> usize {
        self.order.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.order.is_empty()
    }


    /// Id of the track at the current position.
    pub fn current_id( &self ) -> Option<&TrackId> {
        self.position.and_then( |p| self.order.get( p ) )
    }
}


/// Owns the catalog snapshot, the playback mode and the queue state.
pub struct QueueModel {
    catalog: Catalog,
    mode: PlaybackMode,
    state: QueueState,
    rng: StdRng,
}


impl QueueModel {
    /// Creates an empty queue with an entropy-seeded shuffle.
    pub fn new() -> Self {
        Self::with_rng( StdRng::from_entropy() )
    }


    /// Creates an empty queue whose shuffle decisions are reproducible.
    pub fn with_seed( seed: u64 ) -> Self {
        Self::with_rng( StdRng::seed_from_u64( seed ) )
    }


    fn with_rng( rng: StdRng ) -> Self {
        Self {
            catalog: Catalog::default(),
            mode: PlaybackMode::default(),
            state: QueueState::default(),
            rng,
        }
    }


    /// Applies a restored mode. Repeat-all still wins over shuffle.
    pub fn with_mode( mut self, mode: PlaybackMode ) -> Self {
        self.mode.repeat = mode.repeat;
        self.set_shuffle( mode.shuffle && mode.repeat != RepeatMode::All );
        self
    }


    pub fn catalog( &self ) -> &Catalog {
        &self.catalog
    }


    pub fn mode( &self ) -> PlaybackMode {
        self.mode
    }


    pub fn state( &self ) -> &QueueState {
        &self.state
    }


    /// Track at a position of the effective order.
    pub fn track_at( &self, position: usize ) -> Option<&Arc<TrackRecord>> {
        self.state.order.get( position ).and_then( |id| self.catalog.find( id ) )
    }


    /// Track at the current position.
    pub fn current( &self ) -> Option<&Arc<TrackRecord>> {
        self.state.position.and_then( |p| self.track_at( p ) )
    }


    /// Replaces the catalog, keeping the current track selected if it survived.
    pub fn set_catalog( &mut self, catalog: Catalog ) {
        let current = self.state.current_id().cloned();
        self.catalog = catalog;
        self.state.position = None;
        self.state.order = if self.mode.shuffle {
            self.shuffled_order()
        } else {
            self.catalog_order()
        };
        self.relocate( current.as_ref() );

        tracing::info!(
            "Queue loaded: {} tracks, position {:?}",
            self.state.len(),
            self.state.position
        );
        self.check_invariants();
    }


    /// Turns shuffle on or off.
    ///
    /// Turning it on draws a new permutation that keeps the current track at
    /// its position; turning it off restores catalog order.
    pub fn set_shuffle( &mut self, on: bool ) {
        let current = self.state.current_id().cloned();
        self.mode.shuffle = on;

        if on {
            self.state.order = self.shuffled_order();
        } else {
            self.state.order = self.catalog_order();
            self.relocate( current.as_ref() );
        }

        tracing::info!( "Shuffle {}", if on { "on" } else { "off" } );
        self.check_invariants();
    }


    /// Cycles repeat Off, One, All. Entering All switches shuffle off.
    pub fn cycle_repeat( &mut self ) -> RepeatMode {
        self.mode.repeat = self.mode.repeat.cycle();
        if self.mode.repeat == RepeatMode::All && self.mode.shuffle {
            self.set_shuffle( false );
        }

        tracing::info!( "Repeat {}", self.mode.repeat );
        self.mode.repeat
    }


    /// Moves to the next position and returns it.
    ///
    /// Returns None when the queue is exhausted; the position is then left
    /// where it was.
    pub fn advance( &mut self, reason: AdvanceReason ) -> Option<usize> {
        let len = self.state.len();
        if len == 0 {
            return None;
        }

        let position = self.state.position;
        let next = match position {
            _ if self.mode.shuffle => Some( self.random_position() ),
            None => Some( 0 ),
            Some( current ) if self.mode.repeat == RepeatMode::One && reason == AdvanceReason::AutoCompletion => {
                Some( current )
            }
            Some( current ) if current + 1 < len => Some( current + 1 ),
            Some( _ ) if self.mode.repeat == RepeatMode::All => Some( 0 ),
            Some( _ ) => None,
        };

        if next.is_some() {
            self.state.position = next;
        }
        self.check_invariants();
        next
    }


    /// Moves to the previous position, wrapping from the first to the last.
    pub fn retreat( &mut self ) -> Option<usize> {
        let len = self.state.len();
        if len == 0 {
            return None;
        }

        let previous = match self.state.position {
            Some( current ) if current > 0 => current - 1,
            _ => len - 1,
        };

        self.state.position = Some( previous );
        self.check_invariants();
        Some( previous )
    }


    /// Makes the given track current.
    pub fn select( &mut self, id: &TrackId ) -> Option<usize> {
        let position = self.state.order.iter().position( |o| o == id )?;
        self.state.position = Some( position );
        Some( position )
    }


    fn catalog_order( &self ) -> Vec<TrackId> {
        self.catalog.ids().cloned().collect()
    }


    /// Fresh permutation with the current track pinned to its position.
    fn shuffled_order( &mut self ) -> Vec<TrackId> {
        let pinned = self.state.position.zip( self.state.current_id().cloned() );

        let mut order: Vec<TrackId> = self.catalog
            .ids()
            .filter( |id| pinned.as_ref().map_or( true, |( _, p )| *id != p ) )
            .cloned()
            .collect();
        order.shuffle( &mut self.rng );

        if let Some(( position, id )) = pinned {
            order.insert( position.min( order.len() ), id );
        }
        order
    }


    /// Uniform pick over the order, avoiding the current position when possible.
    fn random_position( &mut self ) -> usize {
        let len = self.state.len();
        match self.state.position {
            Some( current ) if len > 1 => {
                let pick = self.rng.gen_range( 0..len - 1 );
                if pick >= current { pick + 1 } else { pick }
            }
            Some( current ) => current,
            None => self.rng.gen_range( 0..len ),
        }
    }


    fn relocate( &mut self, id: Option<&TrackId> ) {
        self.state.position = id.and_then( |id| self.state.order.iter().position( |o| o == id ) );
    }


    fn check_invariants( &self ) {
        debug_assert_eq!( self.state.order.len(), self.catalog.len() );
        debug_assert!( self.state.position.map_or( true, |p| p < self.state.order.len() ) );
    }
}


impl Default for QueueModel {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use proptest::prelude::*;


    fn catalog_of( n: usize ) -> Catalog {
        Catalog::new( ( 0..n ).map( |i| {
            TrackRecord::new( format!( "/music/{:02}.mp3", i ), format!( "Track {}", i ), "Artist" )
        }))
    }


    fn queue_of( n: usize ) -> QueueModel {
        let mut queue = QueueModel::with_seed( 7 );
        queue.set_catalog( catalog_of( n ) );
        queue
    }


    fn id( i: usize ) -> TrackId {
        TrackId::from_path( std::path::Path::new( &format!( "/music/{:02}.mp3", i ) ) )
    }


    #[test]
    fn test_empty_catalog_is_inert() {
        let mut queue = queue_of( 0 );
        assert_eq!( queue.advance( AdvanceReason::Manual ), None );
        assert_eq!( queue.advance( AdvanceReason::AutoCompletion ), None );
        assert_eq!( queue.retreat(), None );
        queue.set_shuffle( true );
        assert_eq!( queue.advance( AdvanceReason::Manual ), None );
        assert_eq!( queue.state().position(), None );
    }


    #[test]
    fn test_linear_advance_and_exhaustion() {
        let mut queue = queue_of( 3 );
        queue.select( &id( 1 ) );

        assert_eq!( queue.advance( AdvanceReason::AutoCompletion ), Some( 2 ) );
        assert_eq!( queue.advance( AdvanceReason::AutoCompletion ), None );
        assert_eq!( queue.state().position(), Some( 2 ) );
    }


    #[test]
    fn test_advance_without_selection_starts_at_top() {
        let mut queue = queue_of( 3 );
        assert_eq!( queue.advance( AdvanceReason::Manual ), Some( 0 ) );
    }


    #[test]
    fn test_repeat_one_replays_only_on_completion() {
        let mut queue = queue_of( 3 );
        queue.cycle_repeat();
        assert_eq!( queue.mode().repeat, RepeatMode::One );
        queue.select( &id( 1 ) );

        for _ in 0..5 {
            assert_eq!( queue.advance( AdvanceReason::AutoCompletion ), Some( 1 ) );
        }
        assert_eq!( queue.advance( AdvanceReason::Manual ), Some( 2 ) );
    }


    #[test]
    fn test_repeat_all_wraps_around() {
        let mut queue = queue_of( 4 );
        queue.cycle_repeat();
        queue.cycle_repeat();
        assert_eq!( queue.mode().repeat, RepeatMode::All );
        queue.select( &id( 3 ) );

        assert_eq!( queue.advance( AdvanceReason::AutoCompletion ), Some( 0 ) );
        for expected in 1..4 {
            assert_eq!( queue.advance( AdvanceReason::AutoCompletion ), Some( expected ) );
        }
        assert_eq!( queue.advance( AdvanceReason::Manual ), Some( 0 ) );
    }


    #[test]
    fn test_retreat_wraps_regardless_of_repeat() {
        let mut queue = queue_of( 3 );
        queue.select( &id( 0 ) );
        assert_eq!( queue.retreat(), Some( 2 ) );
        assert_eq!( queue.retreat(), Some( 1 ) );
    }


    #[test]
    fn test_repeat_all_disables_shuffle() {
        let mut queue = queue_of( 5 );
        queue.set_shuffle( true );
        queue.cycle_repeat();
        assert!( queue.mode().shuffle );

        queue.cycle_repeat();
        assert_eq!( queue.mode().repeat, RepeatMode::All );
        assert!( !queue.mode().shuffle );
        assert_eq!( queue.state().order(), catalog_of( 5 ).ids().cloned().collect::<Vec<_>>().as_slice() );
    }


    #[test]
    fn test_shuffle_keeps_current_track_in_place() {
        let mut queue = queue_of( 10 );
        queue.select( &id( 4 ) );
        queue.set_shuffle( true );

        assert_eq!( queue.state().position(), Some( 4 ) );
        assert_eq!( queue.state().current_id(), Some( &id( 4 ) ) );

        queue.set_shuffle( false );
        assert_eq!( queue.state().position(), Some( 4 ) );
        assert_eq!( queue.current().unwrap().id(), &id( 4 ) );
    }


    #[test]
    fn test_shuffle_off_relocates_to_catalog_index() {
        let mut queue = queue_of( 10 );
        queue.set_shuffle( true );
        queue.advance( AdvanceReason::Manual );
        let playing = queue.state().current_id().cloned().unwrap();

        queue.set_shuffle( false );
        assert_eq!( queue.state().position(), queue.catalog().position_of( &playing ) );
    }


    #[test]
    fn test_shuffle_never_repeats_current_when_it_can_move() {
        let mut queue = queue_of( 2 );
        queue.set_shuffle( true );
        queue.advance( AdvanceReason::Manual );

        for _ in 0..20 {
            let before = queue.state().position();
            let after = queue.advance( AdvanceReason::AutoCompletion );
            assert_ne!( before, after );
        }
    }


    #[test]
    fn test_single_track_shuffle_stays_put() {
        let mut queue = queue_of( 1 );
        queue.set_shuffle( true );
        for _ in 0..3 {
            assert_eq!( queue.advance( AdvanceReason::Manual ), Some( 0 ) );
        }
    }


    #[test]
    fn test_same_seed_same_shuffle() {
        let mut a = QueueModel::with_seed( 42 );
        let mut b = QueueModel::with_seed( 42 );
        a.set_catalog( catalog_of( 20 ) );
        b.set_catalog( catalog_of( 20 ) );
        a.set_shuffle( true );
        b.set_shuffle( true );

        assert_eq!( a.state(), b.state() );
        for _ in 0..10 {
            assert_eq!( a.advance( AdvanceReason::Manual ), b.advance( AdvanceReason::Manual ) );
        }
    }


    #[test]
    fn test_reload_keeps_current_track() {
        let mut queue = queue_of( 5 );
        queue.select( &id( 3 ) );

        let reloaded = Catalog::new( vec![
            TrackRecord::new( "/music/09.mp3", "New", "Artist" ),
            TrackRecord::new( "/music/03.mp3", "Track 3", "Artist" ),
        ]);
        queue.set_catalog( reloaded );
        assert_eq!( queue.state().position(), Some( 1 ) );

        queue.set_catalog( catalog_of( 2 ) );
        assert_eq!( queue.state().position(), None );
    }


    #[test]
    fn test_with_mode_resolves_conflict() {
        let queue = QueueModel::with_seed( 1 ).with_mode( PlaybackMode { shuffle: true, repeat: RepeatMode::All } );
        assert_eq!( queue.mode(), PlaybackMode { shuffle: false, repeat: RepeatMode::All } );
    }


    #[test]
    fn test_repeat_mode_parse() {
        assert_eq!( "ONE".parse::<RepeatMode>(), Ok( RepeatMode::One ) );
        assert_eq!( "2".parse::<RepeatMode>(), Ok( RepeatMode::All ) );
        assert!( "sometimes".parse::<RepeatMode>().is_err() );
    }


    #[derive( Debug, Clone )]
    enum Op {
        Next,
        Complete,
        Previous,
        Shuffle( bool ),
        Repeat,
        Select( usize ),
        Reload( usize ),
    }


    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just( Op::Next ),
            Just( Op::Complete ),
            Just( Op::Previous ),
            any::<bool>().prop_map( Op::Shuffle ),
            Just( Op::Repeat ),
            ( 0usize..12 ).prop_map( Op::Select ),
            ( 0usize..12 ).prop_map( Op::Reload ),
        ]
    }


    proptest! {
        /// Position stays in range and the order stays a permutation of the catalog.
        #[test]
        fn queue_state_stays_consistent( seed in any::<u64>(), size in 0usize..12, ops in prop::collection::vec( op(), 1..60 ) ) {
            let mut queue = QueueModel::with_seed( seed );
            queue.set_catalog( catalog_of( size ) );

            for op in ops {
                match op {
                    Op::Next => { queue.advance( AdvanceReason::Manual ); }
                    Op::Complete => { queue.advance( AdvanceReason::AutoCompletion ); }
                    Op::Previous => { queue.retreat(); }
                    Op::Shuffle( on ) => queue.set_shuffle( on ),
                    Op::Repeat => {
                        if queue.cycle_repeat() == RepeatMode::All {
                            prop_assert!( !queue.mode().shuffle );
                        }
                    }
                    Op::Select( i ) => { queue.select( &id( i ) ); }
                    Op::Reload( n ) => queue.set_catalog( catalog_of( n ) ),
                }

                let state = queue.state();
                prop_assert!( state.position().map_or( true, |p| p < state.len() ) );

                let order: HashSet<_> = state.order().iter().collect();
                let catalog: HashSet<_> = queue.catalog().ids().collect();
                prop_assert_eq!( order.len(), state.len() );
                prop_assert_eq!( order, catalog );
            }
        }


        /// Repeat-one completion never moves, whatever the starting point.
        #[test]
        fn repeat_one_is_idempotent( size in 1usize..12, start in 0usize..12, n in 1usize..20 ) {
            let mut queue = queue_of( size );
            queue.cycle_repeat();
            queue.select( &id( start % size ) );
            let before = queue.state().position();

            for _ in 0..n {
                prop_assert_eq!( queue.advance( AdvanceReason::AutoCompletion ), before );
            }
        }
    }
}
