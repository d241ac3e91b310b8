//! Cadenza CLI - Terminal UI music player

mod cli;
mod input;
mod logging;
mod media_controls;
mod settings;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{ Duration, Instant };

use anyhow::{ Context, Result };
use clap::Parser;
use crossterm::{
    event::{ self, Event, KeyCode, KeyEventKind },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, List, ListItem, ListState, Paragraph, Wrap },
};
use tokio::sync::broadcast::{ self, error::TryRecvError };

use cadenza_core::{
    command, Catalog, CatalogProvider, Command, DirectoryCatalog, NotifierEvent, PlaybackStatus,
    PlayerConfig, PlayerHandle, PlayerService, RepeatMode, SymphoniaEngine, TrackRecord,
};

use cli::Args;
use input::{ InputLine, InputMode, SlashCommand };
use media_controls::MediaControlsHandler;
use settings::Settings;


/// Seek step for the arrow keys.
const SEEK_STEP: Duration = Duration::from_secs( 5 );

const PROGRESS_WIDTH: usize = 24;


#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
enum ViewMode {
    #[default]
    Library,
    Help,
}


/// Application state.
struct App {
    // Keeps the player thread alive; dropped last
    _service: PlayerService,
    player: PlayerHandle,
    events: broadcast::Receiver<NotifierEvent>,
    now: NotifierEvent,

    provider: DirectoryCatalog,
    catalog: Catalog,
    filter: String,
    visible: Vec<Arc<TrackRecord>>,
    list_state: ListState,

    view_mode: ViewMode,
    input_mode: InputMode,
    input_line: InputLine,
    help_scroll: u16,

    status_message: Option<String>,
    status_clear_at: Option<Instant>,

    media_controls: Option<MediaControlsHandler>,
    settings: Settings,
    should_quit: bool,
}


impl App {
    /// Starts the player and loads the library.
    fn new( args: &Args, settings: Settings ) -> Result<Self> {
        let roots = library_roots( args, &settings );

        let mut provider = DirectoryCatalog::new();
        for root in roots {
            provider.add_root( root );
        }

        let config = PlayerConfig {
            prepare_timeout: args.prepare_timeout
                .or( settings.prepare_timeout_secs )
                .map( Duration::from_secs ),
            shuffle_seed: args.seed,
            initial_mode: settings.playback_mode(),
            ..PlayerConfig::default()
        };

        let service = PlayerService::spawn( config, SymphoniaEngine::new )
            .context( "starting the player" )?;
        let player = service.handle();
        let events = player.subscribe();

        let media_controls = if settings.media_controls_enabled {
            MediaControlsHandler::new( player.clone() )
        } else {
            None
        };
        if media_controls.is_some() {
            tracing::info!( "System media controls initialized" );
        }

        let mut app = Self {
            now: player.snapshot(),
            _service: service,
            player,
            events,
            provider,
            catalog: Catalog::default(),
            filter: String::new(),
            visible: Vec::new(),
            list_state: ListState::default(),
            view_mode: ViewMode::Library,
            input_mode: InputMode::Normal,
            input_line: InputLine::new(),
            help_scroll: 0,
            status_message: None,
            status_clear_at: None,
            media_controls,
            settings,
            should_quit: false,
        };
        app.reload_catalog()?;
        Ok( app )
    }


    /// Sets a status message that auto-clears after a delay.
    fn set_status( &mut self, msg: impl Into<String> ) {
        self.status_message = Some( msg.into() );
        self.status_clear_at = Some( Instant::now() + Duration::from_secs( 3 ) );
    }


    /// Clears expired messages and applies player events.
    fn tick( &mut self ) {
        if let Some( clear_at ) = self.status_clear_at {
            if Instant::now() >= clear_at {
                self.status_message = None;
                self.status_clear_at = None;
            }
        }

        loop {
            match self.events.try_recv() {
                Ok( event ) => self.on_player_event( event ),
                Err( TryRecvError::Lagged( skipped ) ) => {
                    tracing::debug!( "UI skipped {} player events", skipped );
                    let latest = self.player.snapshot();
                    self.on_player_event( latest );
                }
                Err( TryRecvError::Empty ) => break,
                Err( TryRecvError::Closed ) => {
                    self.set_status( "Player stopped unexpectedly" );
                    break;
                }
            }
        }
    }


    fn on_player_event( &mut self, event: NotifierEvent ) {
        if let PlaybackStatus::Error( reason ) = &event.status {
            if self.now.status != event.status {
                self.set_status( format!( "Cannot play: {}", reason ) );
            }
        }

        if let Some( controls ) = self.media_controls.as_mut() {
            controls.sync( &event );
        }
        self.now = event;
    }


    /// Rescans the library roots and hands the result to the player.
    fn reload_catalog( &mut self ) -> Result<()> {
        self.catalog = Catalog::new( self.provider.load_catalog() );
        self.player.load_catalog( self.catalog.clone() )?;
        self.apply_filter();
        tracing::info!( "Library loaded: {} tracks", self.catalog.len() );
        Ok(())
    }


    fn set_filter( &mut self, term: String ) {
        self.filter = term;
        self.apply_filter();
    }


    fn apply_filter( &mut self ) {
        self.visible = self.catalog.search( &self.filter );
        let selected = match self.list_state.selected() {
            _ if self.visible.is_empty() => None,
            Some( i ) => Some( i.min( self.visible.len() - 1 ) ),
            None => Some( 0 ),
        };
        self.list_state.select( selected );
    }


    /// Clearing the search shows the whole library, freshly scanned.
    fn clear_filter( &mut self ) {
        self.filter.clear();
        if let Err( e ) = self.reload_catalog() {
            self.set_status( format!( "Error: {}", e ) );
        }
    }


    fn handle_key( &mut self, code: KeyCode ) {
        match self.input_mode {
            InputMode::Normal => self.handle_normal_key( code ),
            InputMode::Command => self.handle_command_key( code ),
            InputMode::Search => self.handle_search_key( code ),
        }
    }


    fn handle_normal_key( &mut self, code: KeyCode ) {
        if self.view_mode == ViewMode::Help {
            match code {
                KeyCode::Esc | KeyCode::Char( '?' ) | KeyCode::Char( 'q' ) => {
                    self.view_mode = ViewMode::Library;
                    self.help_scroll = 0;
                }
                KeyCode::Up | KeyCode::Char( 'k' ) => self.help_scroll = self.help_scroll.saturating_sub( 1 ),
                KeyCode::Down | KeyCode::Char( 'j' ) => self.help_scroll = self.help_scroll.saturating_add( 1 ),
                _ => {}
            }
            return;
        }

        let result = match code {
            KeyCode::Char( 'q' ) => {
                self.should_quit = true;
                Ok(())
            }
            KeyCode::Char( '/' ) => {
                self.input_mode = InputMode::Command;
                self.input_line.clear();
                Ok(())
            }
            KeyCode::Char( 'f' ) => {
                self.input_mode = InputMode::Search;
                self.input_line.clear();
                for c in self.filter.chars() {
                    self.input_line.insert( c );
                }
                Ok(())
            }
            KeyCode::Char( '?' ) => {
                self.view_mode = ViewMode::Help;
                Ok(())
            }
            KeyCode::Esc if !self.filter.is_empty() => {
                self.clear_filter();
                Ok(())
            }

            KeyCode::Char( ' ' ) => self.player.toggle(),
            KeyCode::Char( 'n' ) => self.player.skip_next(),
            KeyCode::Char( 'p' ) => self.player.skip_previous(),
            KeyCode::Char( 's' ) => self.player.send( Command::ToggleShuffle ),
            KeyCode::Char( 'r' ) => self.player.cycle_repeat(),
            KeyCode::Char( 'x' ) => self.player.stop(),
            KeyCode::Enter => self.play_selected(),
            KeyCode::Left => self.seek_by( SEEK_STEP, false ),
            KeyCode::Right => self.seek_by( SEEK_STEP, true ),

            KeyCode::Up | KeyCode::Char( 'k' ) => {
                self.select_relative( -1 );
                Ok(())
            }
            KeyCode::Down | KeyCode::Char( 'j' ) => {
                self.select_relative( 1 );
                Ok(())
            }
            KeyCode::PageUp => {
                self.select_relative( -10 );
                Ok(())
            }
            KeyCode::PageDown => {
                self.select_relative( 10 );
                Ok(())
            }
            KeyCode::Home => {
                self.list_state.select( ( !self.visible.is_empty() ).then_some( 0 ) );
                Ok(())
            }
            KeyCode::End => {
                self.list_state.select( self.visible.len().checked_sub( 1 ) );
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err( e ) = result {
            self.set_status( format!( "Error: {}", e ) );
        }
    }


    fn handle_command_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Enter => {
                let input = self.input_line.text();
                self.input_mode = InputMode::Normal;
                self.input_line.clear();
                self.execute_command( &input );
            }
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input_line.clear();
            }
            KeyCode::Backspace => {
                if self.input_line.is_empty() {
                    self.input_mode = InputMode::Normal;
                } else {
                    self.input_line.backspace();
                }
            }
            KeyCode::Delete => self.input_line.delete(),
            KeyCode::Left => self.input_line.move_left(),
            KeyCode::Right => self.input_line.move_right(),
            KeyCode::Home => self.input_line.move_home(),
            KeyCode::End => self.input_line.move_end(),
            KeyCode::Char( c ) => self.input_line.insert( c ),
            _ => {}
        }
    }


    fn handle_search_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Enter => {
                self.input_mode = InputMode::Normal;
                self.input_line.clear();
            }
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input_line.clear();
                self.clear_filter();
            }
            KeyCode::Backspace => {
                self.input_line.backspace();
                if self.input_line.is_empty() {
                    self.clear_filter();
                } else {
                    self.set_filter( self.input_line.text() );
                }
            }
            KeyCode::Left => self.input_line.move_left(),
            KeyCode::Right => self.input_line.move_right(),
            KeyCode::Char( c ) => {
                self.input_line.insert( c );
                self.set_filter( self.input_line.text() );
            }
            _ => {}
        }
    }


    fn execute_command( &mut self, input: &str ) {
        let result: Result<()> = match SlashCommand::parse( input ) {
            Ok( SlashCommand::Transport( command ) ) => {
                let name = command.description();
                match self.player.send( command ) {
                    Ok(()) => {
                        self.set_status( name );
                        Ok(())
                    }
                    Err( e ) => Err( e.into() ),
                }
            }
            Ok( SlashCommand::Find( term ) ) => {
                if term.is_empty() {
                    self.clear_filter();
                } else {
                    self.set_filter( term );
                }
                Ok(())
            }
            Ok( SlashCommand::Rescan ) => match self.reload_catalog() {
                Ok(()) => {
                    let count = self.catalog.len();
                    self.set_status( format!( "Library reloaded: {} tracks", count ) );
                    Ok(())
                }
                Err( e ) => Err( e ),
            },
            Ok( SlashCommand::Help ) => {
                self.view_mode = ViewMode::Help;
                Ok(())
            }
            Ok( SlashCommand::Quit ) => {
                self.should_quit = true;
                Ok(())
            }
            Err( e ) => Err( e.into() ),
        };

        if let Err( e ) = result {
            self.set_status( format!( "Error: {}", e ) );
        }
    }


    fn play_selected( &mut self ) -> Result<(), cadenza_core::ServiceError> {
        match self.list_state.selected().and_then( |i| self.visible.get( i ) ) {
            Some( track ) => self.player.play( track.id().clone() ),
            None => Ok(()),
        }
    }


    /// Seeks relative to the engine's current position.
    fn seek_by( &mut self, step: Duration, forward: bool ) -> Result<(), cadenza_core::ServiceError> {
        if !matches!( self.now.status, PlaybackStatus::Playing | PlaybackStatus::Paused ) {
            return Ok(());
        }

        let progress = self.player.blocking_progress()?;
        let target = if forward {
            let target = progress.position + step;
            progress.duration.map_or( target, |d| target.min( d ) )
        } else {
            progress.position.saturating_sub( step )
        };
        self.player.seek_to( target )
    }


    fn select_relative( &mut self, delta: isize ) {
        if self.visible.is_empty() {
            return;
        }
        let last = self.visible.len() - 1;
        let current = self.list_state.selected().unwrap_or( 0 );
        let next = current.saturating_add_signed( delta ).min( last );
        self.list_state.select( Some( next ) );
    }


    /// Remembers the playback mode and library roots for next time.
    fn save_settings( &mut self ) {
        self.settings.set_playback_mode( self.now.mode );
        self.settings.library_roots = self.provider.roots().to_vec();
        self.settings.save();
    }
}


/// Library roots from the command line, then settings, then the music folder.
fn library_roots( args: &Args, settings: &Settings ) -> Vec<PathBuf> {
    if !args.roots.is_empty() {
        return args.roots.clone();
    }
    if !settings.library_roots.is_empty() {
        return settings.library_roots.clone();
    }
    dirs::audio_dir().into_iter().collect()
}


fn main() -> Result<()> {
    let args = Args::parse();

    if let Some( path ) = args.log_file.clone().or_else( logging::default_log_path ) {
        logging::init( &path )?;
    }

    let mut app = App::new( &args, Settings::load() )?;

    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;
    let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;

    let result = run( &mut terminal, &mut app );

    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;

    app.save_settings();
    result
}


fn run( terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App ) -> Result<()> {
    loop {
        app.tick();
        terminal.draw( |frame| draw_ui( frame, app ) )?;

        if event::poll( Duration::from_millis( 100 ) )? {
            if let Event::Key( key ) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key( key.code );
                }
            }
        }

        if app.should_quit {
            tracing::info!( "Quitting" );
            return Ok(());
        }
    }
}


/// Draws the main UI.
fn draw_ui( frame: &mut Frame, app: &mut App ) {
    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 2 ),  // Header
            Constraint::Min( 0 ),     // Library or help
            Constraint::Length( 6 ),  // Now playing
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( frame.area() );

    let view = match app.view_mode {
        ViewMode::Library => "LIBRARY",
        ViewMode::Help => "HELP",
    };
    let header = Paragraph::new( format!( "  CADENZA - {}", view ) )
        .style( Style::default().fg( Color::Cyan ).bold() )
        .block( Block::default().borders( Borders::BOTTOM ) );
    frame.render_widget( header, chunks[ 0 ] );

    match app.view_mode {
        ViewMode::Library => draw_library( frame, app, chunks[ 1 ] ),
        ViewMode::Help => draw_help( frame, app, chunks[ 1 ] ),
    }

    draw_now_playing( frame, app, chunks[ 2 ] );
    draw_status_bar( frame, app, chunks[ 3 ] );
}


fn draw_library( frame: &mut Frame, app: &mut App, area: Rect ) {
    let playing = app.now.track.as_ref().map( |t| t.id().clone() );

    let items: Vec<ListItem> = app.visible
        .iter()
        .map( |track| {
            let marker = if Some( track.id() ) == playing.as_ref() { "▶ " } else { "  " };
            ListItem::new( Line::from( vec![
                Span::raw( marker ),
                Span::styled( track.title().to_string(), Style::default().bold() ),
                Span::styled( format!( "  {}", track.artist() ), Style::default().fg( Color::Gray ) ),
            ]))
        })
        .collect();

    let title = if app.filter.is_empty() {
        format!( " Library ({}) ", app.catalog.len() )
    } else {
        format!( " Library ({} of {}) - \"{}\" ", app.visible.len(), app.catalog.len(), app.filter )
    };

    let list = List::new( items )
        .block( Block::default().title( title ).borders( Borders::ALL ) )
        .highlight_style( Style::default().bg( Color::DarkGray ) )
        .highlight_symbol( ">> " );

    frame.render_stateful_widget( list, area, &mut app.list_state );
}


fn draw_help( frame: &mut Frame, app: &App, area: Rect ) {
    let help = Paragraph::new( command::help_text() )
        .block( Block::default().title( " Help " ).borders( Borders::ALL ) )
        .wrap( Wrap { trim: false } )
        .scroll(( app.help_scroll, 0 ));
    frame.render_widget( help, area );
}


fn draw_now_playing( frame: &mut Frame, app: &App, area: Rect ) {
    let now = &app.now;

    let state_str = match &now.status {
        PlaybackStatus::Playing => "▶",
        PlaybackStatus::Paused => "⏸",
        PlaybackStatus::Preparing => "…",
        PlaybackStatus::Idle => "■",
        PlaybackStatus::Error( _ ) => "✗",
    };

    let ( title, artist ) = match &now.track {
        Some( track ) => ( track.title().to_string(), track.artist().to_string() ),
        None => ( "No track".to_string(), String::new() ),
    };

    let mode = format!(
        "{}{}",
        if now.mode.shuffle { "[S]" } else { "" },
        match now.mode.repeat {
            RepeatMode::Off => "",
            RepeatMode::One => "[R1]",
            RepeatMode::All => "[R]",
        }
    );

    let mut lines = vec![
        Line::from( vec![
            Span::styled( format!( " {} {} ", state_str, title ), Style::default().bold() ),
            Span::styled( mode, Style::default().fg( Color::Cyan ) ),
        ]),
        Line::from( Span::styled( format!( "   {} ", artist ), Style::default().fg( Color::Gray ) ) ),
    ];

    let progress = now.progress.unwrap_or_default();
    let filled = ( progress.fraction() * PROGRESS_WIDTH as f64 ).round() as usize;
    lines.push( Line::from( format!(
        " [{}{}] {} {}",
        "━".repeat( filled ),
        "─".repeat( PROGRESS_WIDTH - filled ),
        progress.elapsed_label(),
        progress.remaining_label(),
    )));

    if let PlaybackStatus::Error( reason ) = &now.status {
        lines.push( Line::from( Span::styled( format!( " Error: {}", reason ), Style::default().fg( Color::Red ) ) ) );
    }

    let panel = Paragraph::new( lines )
        .block( Block::default().title( " Now Playing " ).borders( Borders::ALL ) );
    frame.render_widget( panel, area );
}


fn draw_status_bar( frame: &mut Frame, app: &App, area: Rect ) {
    let ( text, style ) = match app.input_mode {
        InputMode::Command => ( format!( "/{}", app.input_line.text() ), Style::default().fg( Color::Yellow ) ),
        InputMode::Search => ( format!( "Find: {}", app.input_line.text() ), Style::default().fg( Color::Yellow ) ),
        InputMode::Normal => match &app.status_message {
            Some( msg ) => ( msg.clone(), Style::default().fg( Color::Green ) ),
            None => {
                let hint = match app.view_mode {
                    ViewMode::Library => " [Space]Play/Pause [n/p]Next/Prev [s]Shuffle [r]Repeat [←→]Seek [f]Find [/]Cmd [?]Help [q]Quit ",
                    ViewMode::Help => " [↑↓]Scroll [?/Esc]Close ",
                };
                ( hint.to_string(), Style::default().fg( Color::DarkGray ) )
            }
        },
    };

    frame.render_widget( Paragraph::new( text ).style( style ), area );

    if app.input_mode != InputMode::Normal {
        let prefix = if app.input_mode == InputMode::Command { 1 } else { 6 };
        let cursor_x = area.x + prefix + app.input_line.cursor() as u16;
        frame.set_cursor_position(( cursor_x, area.y ));
    }
}
