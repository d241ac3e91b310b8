//! Text entry for the command and search lines.

use cadenza_core::{ Command, CommandError };


/// Current input mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    /// Keyboard shortcuts active.
    #[default]
    Normal,

    /// Typing a slash command.
    Command,

    /// Typing a library filter.
    Search,
}


/// Single-line editor. The cursor is a character index.
#[derive( Debug, Default )]
pub struct InputLine {
    chars: Vec<char>,
    cursor: usize,
}


impl InputLine {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn insert( &mut self, c: char ) {
        self.chars.insert( self.cursor, c );
        self.cursor += 1;
    }


    /// Deletes the character before the cursor.
    pub fn backspace( &mut self ) {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.chars.remove( self.cursor );
        }
    }


    /// Deletes the character under the cursor.
    pub fn delete( &mut self ) {
        if self.cursor < self.chars.len() {
            self.chars.remove( self.cursor );
        }
    }


    pub fn clear( &mut self ) {
        self.chars.clear();
        self.cursor = 0;
    }


    pub fn text( &self ) -> String {
        self.chars.iter().collect()
    }


    /// Cursor position in characters, for display.
    pub fn cursor( &self ) -> usize {
        self.cursor
    }


    pub fn move_left( &mut self ) {
        self.cursor = self.cursor.saturating_sub( 1 );
    }


    pub fn move_right( &mut self ) {
        self.cursor = ( self.cursor + 1 ).min( self.chars.len() );
    }


    pub fn move_home( &mut self ) {
        self.cursor = 0;
    }


    pub fn move_end( &mut self ) {
        self.cursor = self.chars.len();
    }


    pub fn is_empty( &self ) -> bool {
        self.chars.is_empty()
    }
}


/// A slash command as typed in the UI.
///
/// Transport commands go to the player; the rest are handled by the UI.
#[derive( Debug, Clone, PartialEq )]
pub enum SlashCommand {
    Transport( Command ),
    Find( String ),
    Rescan,
    Help,
    Quit,
}


impl SlashCommand {
    /// Parses a slash command (without the leading `/`).
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let ( cmd, args ) = input.split_once( ' ' ).unwrap_or(( input, "" ));

        match cmd.to_lowercase().as_str() {
            "find" | "search" | "f" => Ok( SlashCommand::Find( args.trim().to_string() ) ),
            "rescan" | "reload" => Ok( SlashCommand::Rescan ),
            "help" | "h" | "?" => Ok( SlashCommand::Help ),
            "quit" | "q" | "exit" => Ok( SlashCommand::Quit ),
            _ => Command::parse( input ).map( SlashCommand::Transport ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_editing_multibyte_text() {
        let mut line = InputLine::new();
        for c in "héllo".chars() {
            line.insert( c );
        }
        line.move_left();
        line.move_left();
        line.backspace();
        assert_eq!( line.text(), "hélo" );
        assert_eq!( line.cursor(), 2 );

        line.move_home();
        line.delete();
        assert_eq!( line.text(), "élo" );

        line.move_end();
        line.move_right();
        assert_eq!( line.cursor(), 3 );
    }


    #[test]
    fn test_backspace_at_start_is_noop() {
        let mut line = InputLine::new();
        line.backspace();
        line.insert( 'a' );
        line.move_home();
        line.backspace();
        assert_eq!( line.text(), "a" );
    }


    #[test]
    fn test_parse_ui_commands() {
        assert_eq!( SlashCommand::parse( "find daft punk" ).unwrap(), SlashCommand::Find( "daft punk".into() ) );
        assert_eq!( SlashCommand::parse( "find" ).unwrap(), SlashCommand::Find( String::new() ) );
        assert_eq!( SlashCommand::parse( "Q" ).unwrap(), SlashCommand::Quit );
        assert_eq!( SlashCommand::parse( "rescan" ).unwrap(), SlashCommand::Rescan );
    }


    #[test]
    fn test_parse_falls_through_to_transport() {
        assert_eq!( SlashCommand::parse( "next" ).unwrap(), SlashCommand::Transport( Command::SkipNext ) );
        assert!( matches!( SlashCommand::parse( "dance" ), Err( CommandError::Unknown( _ ) ) ) );
    }
}
