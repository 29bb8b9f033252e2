//! Full-screen live table on a raw, non-blocking terminal.

use std::io::{self, Write};
use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::{bail, Result};
use libc::{
    fcntl, ioctl, tcgetattr, tcsetattr, termios, winsize, ECHO, F_GETFL, F_SETFL, ICANON,
    O_NONBLOCK, STDIN_FILENO, STDOUT_FILENO, TCSAFLUSH, TIOCGWINSZ,
};
use tracing::warn;

use crate::registry::ProcessRegistry;
use crate::sampler::PassObserver;

const ENTER_SCREEN: &str = "\x1B[?1049h\x1B[2J\x1B[H\x1B[?25l";
const LEAVE_SCREEN: &str = "\x1B[?1049l\x1B[?25h\x1B[0m";

const DEFAULT_ROWS: usize = 24;
const DEFAULT_COLS: usize = 80;

/// Whether both stdin and stdout are attached to a terminal.
pub fn is_interactive() -> bool {
    // Safety: isatty only inspects the descriptor.
    unsafe { libc::isatty(STDIN_FILENO) == 1 && libc::isatty(STDOUT_FILENO) == 1 }
}

/// Terminal size as (rows, cols), falling back to `LINES`/`COLUMNS` and
/// then 24x80.
pub fn terminal_size() -> (usize, usize) {
    let mut ws: winsize = unsafe { std::mem::zeroed() };
    // Safety: TIOCGWINSZ writes a winsize into the provided struct.
    if unsafe { ioctl(STDOUT_FILENO, TIOCGWINSZ, &mut ws) } == 0 && ws.ws_row > 0 && ws.ws_col > 0
    {
        return (usize::from(ws.ws_row), usize::from(ws.ws_col));
    }

    let from_env = |key: &str, fallback: usize| {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(fallback)
    };
    (from_env("LINES", DEFAULT_ROWS), from_env("COLUMNS", DEFAULT_COLS))
}

/// Puts the terminal into non-canonical, no-echo, non-blocking mode on the
/// alternate screen. The previous state is restored on drop.
///
/// Signal generation stays enabled so Ctrl+C still reaches the process as
/// SIGINT.
pub struct TerminalRawMode {
    original: termios,
    original_flags: libc::c_int,
    active: bool,
}

impl TerminalRawMode {
    pub fn enable() -> Result<Self> {
        let mut original: termios = unsafe { std::mem::zeroed() };
        // Safety: stdin is a valid descriptor and `original` is a valid out
        // pointer. Every call below only touches terminal state.
        if unsafe { tcgetattr(STDIN_FILENO, &mut original) } != 0 {
            bail!("tcgetattr: {}", io::Error::last_os_error());
        }

        let original_flags = unsafe { fcntl(STDIN_FILENO, F_GETFL, 0) };
        if original_flags == -1 {
            bail!("fcntl(F_GETFL): {}", io::Error::last_os_error());
        }

        let mut raw = original;
        raw.c_lflag &= !(ECHO | ICANON);
        if unsafe { tcsetattr(STDIN_FILENO, TCSAFLUSH, &raw) } != 0 {
            bail!("tcsetattr: {}", io::Error::last_os_error());
        }

        if unsafe { fcntl(STDIN_FILENO, F_SETFL, original_flags | O_NONBLOCK) } == -1 {
            let err = io::Error::last_os_error();
            unsafe { tcsetattr(STDIN_FILENO, TCSAFLUSH, &original) };
            bail!("fcntl(F_SETFL): {err}");
        }

        write_stdout(ENTER_SCREEN);

        Ok(Self {
            original,
            original_flags,
            active: true,
        })
    }

    /// Drain pending input. True when a quit key (`q`, `Q`, or a literal
    /// Ctrl+C byte) was pressed.
    pub fn quit_requested(&self) -> bool {
        let mut buf = [0u8; 32];
        let mut quit = false;
        loop {
            // Safety: buf is valid for buf.len() bytes; stdin is non-blocking.
            let n = unsafe { libc::read(STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
            let Ok(n) = usize::try_from(n) else {
                break;
            };
            if n == 0 {
                break;
            }
            quit |= buf[..n].iter().any(|b| matches!(b, b'q' | b'Q' | 3));
        }
        quit
    }

    fn restore(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        // Safety: restores the state captured in `enable`.
        unsafe {
            tcsetattr(STDIN_FILENO, TCSAFLUSH, &self.original);
            fcntl(STDIN_FILENO, F_SETFL, self.original_flags);
        }
        write_stdout(LEAVE_SCREEN);
    }
}

impl Drop for TerminalRawMode {
    fn drop(&mut self) {
        self.restore();
    }
}

fn write_stdout(s: &str) {
    let mut out = io::stdout().lock();
    if let Err(e) = out.write_all(s.as_bytes()).and_then(|()| out.flush()) {
        warn!(error = %e, "terminal write failed");
    }
}

/// Renders a frame after each sampling pass and stops on a quit key.
pub struct LiveView {
    service: String,
    interval: Duration,
    terminal: TerminalRawMode,
}

impl LiveView {
    pub fn new(service: impl Into<String>, interval: Duration) -> Result<Self> {
        Ok(Self {
            service: service.into(),
            interval,
            terminal: TerminalRawMode::enable()?,
        })
    }

    fn draw(&self, tracked: usize, registry: &ProcessRegistry) {
        let (rows, cols) = terminal_size();
        let lines = super::live_frame(
            &self.service,
            self.interval,
            tracked,
            &registry.live_snapshot(),
            rows,
            cols,
        );

        let mut frame = String::from("\x1B[H");
        for line in &lines {
            frame.push_str("\x1B[2K");
            frame.push_str(line);
            frame.push_str("\r\n");
        }
        frame.push_str("\x1B[J");
        write_stdout(&frame);
    }
}

impl PassObserver for LiveView {
    fn after_pass(&mut self, tracked: usize, registry: &ProcessRegistry) -> ControlFlow<()> {
        self.draw(tracked, registry);
        if self.terminal.quit_requested() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
