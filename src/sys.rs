//! Safe wrappers for platform-specific unsafe operations.
//!
//! Every `unsafe` block in the codebase lives here. Call sites use the safe
//! public API and never touch `unsafe` directly.

use std::io;

/// Run a closure with stderr temporarily redirected to `/dev/null`.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Safe as long as no other thread is concurrently manipulating fd 2.
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Set an environment variable.
///
/// # Safety
/// Caller must ensure no other threads are reading environment variables concurrently.
pub fn set_env(key: &str, value: &str) {
    // SAFETY: Caller must ensure no other threads are reading environment
    // variables concurrently.
    #[allow(unsafe_code)]
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Remove an environment variable.
///
/// # Safety
/// Caller must ensure no other threads are reading environment variables concurrently.
pub fn remove_env(key: &str) {
    // SAFETY: Caller must ensure no other threads are reading environment
    // variables concurrently.
    #[allow(unsafe_code)]
    unsafe {
        std::env::remove_var(key);
    }
}

/// Suppress noisy JACK/ALSA/PipeWire messages during audio backend probing.
///
/// Must be called before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned.
    set_env("JACK_NO_START_SERVER", "1");
    set_env("JACK_NO_AUDIO_RESERVATION", "1");
    set_env("PIPEWIRE_DEBUG", "0");
    set_env("ALSA_DEBUG", "0");
    set_env("PW_LOG", "0");
}

/// Wrapper for `cpal::Stream` to make it Send.
///
/// SAFETY: The stream is only touched by its owning device struct, which
/// serializes access (a `&mut self` method or a `Mutex`). The stream methods
/// are called synchronously and don't cross thread boundaries unsafely.
#[cfg(feature = "cpal-audio")]
pub struct SendableStream(pub cpal::Stream);

#[cfg(feature = "cpal-audio")]
unsafe impl Send for SendableStream {}

/// True when stdin is attached to a terminal.
pub fn stdin_is_terminal() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

/// Puts stdin into non-canonical, no-echo mode; restores the original
/// settings on drop.
pub struct RawTerminal {
    original: libc::termios,
}

impl RawTerminal {
    /// Switch stdin to raw key mode.
    ///
    /// Keeps `ISIG`; the session catches the resulting SIGINT and tears down
    /// normally, so the drop below still runs.
    pub fn enable() -> io::Result<Self> {
        // SAFETY: termios is a plain C struct; tcgetattr fills it and we check
        // the return value before using it.
        unsafe {
            let mut original: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut original) != 0 {
                return Err(io::Error::last_os_error());
            }

            let mut raw = original;
            raw.c_lflag &= !(libc::ICANON | libc::ECHO);
            raw.c_cc[libc::VMIN] = 0;
            raw.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw) != 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self { original })
        }
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        // SAFETY: restores the settings captured in `enable`.
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.original);
        }
    }
}

/// Read whatever bytes are pending on stdin without blocking.
///
/// Returns 0 when nothing is pending.
pub fn read_stdin_nonblocking(buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: pollfd is initialised for fd 0 and read writes at most
    // `buf.len()` bytes into a buffer we own.
    unsafe {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = libc::poll(&mut fds, 1, 0);
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 || fds.revents & libc::POLLIN == 0 {
            return Ok(0);
        }
        let n = libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len());
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }
}
