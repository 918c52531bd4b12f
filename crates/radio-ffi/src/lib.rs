//! C ABI over a process-wide [`Engine`].
//!
//! Existing clients poll these functions from UI timers, so every export is
//! non-blocking except `c_stop`, `c_next` and `c_list_playlists`. Strings returned
//! here are heap-allocated and may be released with `c_free_string`; cover buffers
//! must be released with `c_drop`.

use std::ffi::{CStr, CString, c_char, c_float};
use std::ptr;
use std::sync::{Mutex, OnceLock, PoisonError};

use radio_engine::{CoverArt, CoverSize, EncoderKind, Engine, EngineConfig, Settings};
use tracing_subscriber::EnvFilter;

mod guard;

use guard::{guard_void, guard_with_default};

static ENGINE: OnceLock<Engine> = OnceLock::new();

/// Cover buffers currently lent to the caller.
static COVER_LOANS: Mutex<Vec<CoverArt>> = Mutex::new(Vec::new());

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CSettings {
    /// Encoder code, see `EncoderKind`.
    pub encoder: u8,
    /// Cover edge length code, see `CoverSize`.
    pub cover: i32,
}

impl CSettings {
    fn to_settings(self) -> Settings {
        let encoder = EncoderKind::from_code(self.encoder).unwrap_or_else(|| {
            tracing::warn!(code = self.encoder, "unknown encoder code, using pcm16");
            EncoderKind::Pcm16
        });
        let cover = CoverSize::from_code(self.cover).unwrap_or_else(|| {
            tracing::warn!(code = self.cover, "unknown cover size code, using default");
            CoverSize::default()
        });
        Settings { encoder, cover }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct CImageJpeg {
    pub length: u32,
    pub bytes: *mut u8,
}

impl CImageJpeg {
    fn empty() -> Self {
        Self {
            length: 0,
            bytes: ptr::null_mut(),
        }
    }
}

fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| {
        // The host may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .try_init();
        Engine::with_cpal(EngineConfig::default(), None)
    })
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
unsafe fn read_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let raw = unsafe { CStr::from_ptr(ptr) };
    Some(raw.to_string_lossy().into_owned())
}

fn to_c_string(value: String) -> *mut c_char {
    // Interior NULs cannot cross the boundary; truncate at the first one.
    let value = match value.find('\0') {
        Some(end) => value[..end].to_string(),
        None => value,
    };
    CString::new(value).map_or(ptr::null_mut(), CString::into_raw)
}

/// Start streaming. Returns immediately; failures show up as `c_get_state() == 0`.
///
/// # Safety
/// `server` and `playlist` must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn c_start(server: *const c_char, settings: CSettings, playlist: *const c_char) {
    let server = unsafe { read_str(server) };
    let playlist = unsafe { read_str(playlist) }.unwrap_or_default();
    guard_void("c_start", || {
        let Some(server) = server else {
            tracing::warn!("c_start called without a server address");
            return;
        };
        if let Err(e) = engine().start(&server, settings.to_settings(), &playlist) {
            tracing::warn!(error = %e, server = %server, "start rejected");
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn c_toggle() {
    guard_void("c_toggle", || {
        if let Err(e) = engine().toggle() {
            tracing::debug!(error = %e, "toggle ignored");
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn c_stop() {
    guard_void("c_stop", || engine().stop())
}

/// Reconnect to the last server so it sends a new track.
#[unsafe(no_mangle)]
pub extern "C" fn c_next() {
    guard_void("c_next", || {
        if let Err(e) = engine().next() {
            tracing::debug!(error = %e, "next ignored");
        }
    })
}

/// 0 = not started, 2 = playing, 3 = paused.
#[unsafe(no_mangle)]
pub extern "C" fn c_get_state() -> c_char {
    guard_with_default("c_get_state", 0, || engine().state().code() as c_char)
}

#[unsafe(no_mangle)]
pub extern "C" fn c_get_metadata_title() -> *mut c_char {
    guard_with_default("c_get_metadata_title", ptr::null_mut(), || {
        to_c_string(engine().metadata().title)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn c_get_metadata_album() -> *mut c_char {
    guard_with_default("c_get_metadata_album", ptr::null_mut(), || {
        to_c_string(engine().metadata().album)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn c_get_metadata_artist() -> *mut c_char {
    guard_with_default("c_get_metadata_artist", ptr::null_mut(), || {
        to_c_string(engine().metadata().artist)
    })
}

/// Track length in seconds, 0 when idle.
#[unsafe(no_mangle)]
pub extern "C" fn c_get_metadata_length() -> c_float {
    guard_with_default("c_get_metadata_length", 0.0, || {
        engine().track_length() as c_float
    })
}

/// Cover of the current track as sent by the server. Release with `c_drop`.
#[unsafe(no_mangle)]
pub extern "C" fn c_get_cover_jpeg() -> CImageJpeg {
    guard_with_default("c_get_cover_jpeg", CImageJpeg::empty(), || {
        lend_cover(engine().cover(CoverSize::Full))
    })
}

fn lend_cover(cover: CoverArt) -> CImageJpeg {
    let Ok(length) = u32::try_from(cover.len()) else {
        return CImageJpeg::empty();
    };
    if length == 0 {
        return CImageJpeg::empty();
    }
    let image = CImageJpeg {
        length,
        bytes: cover.as_ptr().cast_mut(),
    };
    COVER_LOANS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(cover);
    image
}

/// Release a buffer returned by `c_get_cover_jpeg`. Null and unknown pointers are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn c_drop(ptr: *mut u8, count: usize) {
    guard_void("c_drop", || {
        if ptr.is_null() {
            return;
        }
        let mut loans = COVER_LOANS.lock().unwrap_or_else(PoisonError::into_inner);
        match loans
            .iter()
            .position(|c| c.as_ptr() == ptr.cast_const() && c.len() == count)
        {
            Some(index) => {
                loans.swap_remove(index);
            }
            None => tracing::warn!(count, "c_drop called with a buffer not lent by this library"),
        }
    })
}

/// Release a string returned by any `c_get_metadata_*` or `c_list_playlists`.
///
/// # Safety
/// `ptr` must be null or a pointer obtained from this library and not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn c_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

/// Newline-delimited playlist names offered by `server`, without "All tracks".
/// Empty when the server cannot be reached.
///
/// # Safety
/// `server` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn c_list_playlists(server: *const c_char) -> *mut c_char {
    let server = unsafe { read_str(server) };
    guard_with_default("c_list_playlists", ptr::null_mut(), || {
        let names = match server.map(|s| engine().list_playlists(&s)) {
            Some(Ok(list)) => list
                .into_iter()
                .filter(|e| !e.is_all_tracks())
                .map(|e| e.name)
                .collect::<Vec<_>>()
                .join("\n"),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "listing playlists failed");
                String::new()
            }
            None => String::new(),
        };
        to_c_string(names)
    })
}
