//! System media transport controls integration
//!
//! OS media buttons drive the same [`PlayerHandle`] as the keyboard. On
//! Windows this is SMTC through souvlaki; elsewhere the handler is a stub.

use cadenza_core::Command;


/// Media button press, independent of the OS layer.
#[cfg_attr( not( target_os = "windows" ), allow( dead_code ) )]
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum MediaAction {
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
}


#[cfg_attr( not( target_os = "windows" ), allow( dead_code ) )]
impl MediaAction {
    /// Transport command for the button.
    pub fn command( self ) -> Command {
        match self {
            MediaAction::Play => Command::Resume,
            MediaAction::Pause => Command::Pause,
            MediaAction::Toggle => Command::Toggle,
            MediaAction::Stop => Command::Stop,
            MediaAction::Next => Command::SkipNext,
            MediaAction::Previous => Command::SkipPrevious,
        }
    }
}


#[cfg( target_os = "windows" )]
mod platform {
    use std::ffi::c_void;

    use souvlaki::{ MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, MediaPosition, PlatformConfig };
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ GetLastError, HWND, LPARAM, LRESULT, WPARAM };
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, RegisterClassW,
        CS_HREDRAW, CS_VREDRAW, CW_USEDEFAULT, WNDCLASSW, WS_OVERLAPPEDWINDOW,
    };

    use cadenza_core::{ NotifierEvent, PlaybackStatus, PlayerHandle, TrackId };

    use super::MediaAction;

    const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;


    unsafe extern "system" fn wnd_proc( hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM ) -> LRESULT {
        DefWindowProcW( hwnd, msg, wparam, lparam )
    }


    fn action_for( event: MediaControlEvent ) -> Option<MediaAction> {
        match event {
            MediaControlEvent::Play => Some( MediaAction::Play ),
            MediaControlEvent::Pause => Some( MediaAction::Pause ),
            MediaControlEvent::Toggle => Some( MediaAction::Toggle ),
            MediaControlEvent::Stop => Some( MediaAction::Stop ),
            MediaControlEvent::Next => Some( MediaAction::Next ),
            MediaControlEvent::Previous => Some( MediaAction::Previous ),
            _ => None,
        }
    }


    /// Wrapper around souvlaki MediaControls.
    pub struct MediaControlsHandler {
        controls: MediaControls,
        #[allow( dead_code )]
        hwnd: HWND,
        shown_track: Option<TrackId>,
    }


    impl MediaControlsHandler {
        /// Registers with SMTC and forwards button presses to `player`.
        ///
        /// Returns None if media controls are not available.
        pub fn new( player: PlayerHandle ) -> Option<Self> {
            let hwnd = Self::create_hidden_window()?;

            let config = PlatformConfig {
                dbus_name: "cadenza",
                display_name: "Cadenza",
                hwnd: Some( hwnd.0 as *mut c_void ),
            };

            let mut controls = match MediaControls::new( config ) {
                Ok( c ) => c,
                Err( e ) => {
                    tracing::warn!( "Failed to create media controls: {:?}", e );
                    return None;
                }
            };

            if let Err( e ) = controls.attach( move |event: MediaControlEvent| {
                if let Some( action ) = action_for( event ) {
                    if let Err( e ) = player.send( action.command() ) {
                        tracing::warn!( "Media button dropped: {}", e );
                    }
                }
            }) {
                tracing::warn!( "Failed to attach media control handler: {:?}", e );
                return None;
            }

            tracing::info!( "SMTC initialized with hidden window" );
            Some( Self { controls, hwnd, shown_track: None } )
        }


        /// Creates a hidden window for SMTC binding.
        fn create_hidden_window() -> Option<HWND> {
            unsafe {
                use windows::Win32::UI::Shell::SetCurrentProcessExplicitAppUserModelID;
                use windows::core::HSTRING;

                let app_id = HSTRING::from( "Cadenza.MusicPlayer" );
                let _ = SetCurrentProcessExplicitAppUserModelID( &app_id );

                let class_name: Vec<u16> = "CadenzaSMTC\0".encode_utf16().collect();
                let wc = WNDCLASSW {
                    style: CS_HREDRAW | CS_VREDRAW,
                    lpfnWndProc: Some( wnd_proc ),
                    hInstance: windows::Win32::Foundation::HINSTANCE::default(),
                    lpszClassName: PCWSTR( class_name.as_ptr() ),
                    ..Default::default()
                };

                if RegisterClassW( &wc ) == 0 {
                    let error = GetLastError();
                    if error.0 != ERROR_CLASS_ALREADY_EXISTS {
                        tracing::warn!( "Failed to register SMTC window class: {:?}", error );
                        return None;
                    }
                }

                let window_name: Vec<u16> = "Cadenza\0".encode_utf16().collect();
                let hwnd = match CreateWindowExW(
                    windows::Win32::UI::WindowsAndMessaging::WINDOW_EX_STYLE::default(),
                    PCWSTR( class_name.as_ptr() ),
                    PCWSTR( window_name.as_ptr() ),
                    // Never shown
                    WS_OVERLAPPEDWINDOW,
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    HWND::default(),
                    None,
                    None,
                    None,
                ) {
                    Ok( hwnd ) => hwnd,
                    Err( e ) => {
                        tracing::warn!( "Failed to create SMTC hidden window: {:?}", e );
                        return None;
                    }
                };

                if hwnd.0.is_null() {
                    tracing::warn!( "SMTC hidden window handle is null" );
                    return None;
                }

                Some( hwnd )
            }
        }


        /// Mirrors a notifier event into SMTC.
        pub fn sync( &mut self, event: &NotifierEvent ) {
            let progress = event.progress.map( |p| MediaPosition( p.position ) );
            let playback = match event.status {
                PlaybackStatus::Playing => MediaPlayback::Playing { progress },
                PlaybackStatus::Paused => MediaPlayback::Paused { progress },
                _ => MediaPlayback::Stopped,
            };
            if let Err( e ) = self.controls.set_playback( playback ) {
                tracing::debug!( "Failed to set playback state: {:?}", e );
            }

            let track_id = event.track.as_ref().map( |t| t.id().clone() );
            if track_id == self.shown_track {
                return;
            }
            self.shown_track = track_id;

            let Some( track ) = &event.track else {
                return;
            };
            let cover_url = track.artwork().map( |p| format!( "file://{}", p.display() ) );
            let metadata = MediaMetadata {
                title: Some( track.title() ),
                artist: Some( track.artist() ),
                album: None,
                cover_url: cover_url.as_deref(),
                duration: event.progress.and_then( |p| p.duration ),
            };
            if let Err( e ) = self.controls.set_metadata( metadata ) {
                tracing::warn!( "SMTC metadata error: {:?}", e );
            }
        }
    }
}


#[cfg( not( target_os = "windows" ) )]
mod platform {
    use cadenza_core::{ NotifierEvent, PlayerHandle };


    /// Stub for platforms without media control support.
    pub struct MediaControlsHandler;


    impl MediaControlsHandler {
        /// Returns None on unsupported platforms.
        pub fn new( _player: PlayerHandle ) -> Option<Self> {
            None
        }


        pub fn sync( &mut self, _event: &NotifierEvent ) {}
    }
}


pub use platform::MediaControlsHandler;


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_buttons_map_to_transport_commands() {
        assert_eq!( MediaAction::Play.command(), Command::Resume );
        assert_eq!( MediaAction::Toggle.command(), Command::Toggle );
        assert_eq!( MediaAction::Next.command(), Command::SkipNext );
        assert_eq!( MediaAction::Previous.command(), Command::SkipPrevious );
        assert_eq!( MediaAction::Stop.command(), Command::Stop );
    }
}
