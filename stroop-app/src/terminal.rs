//! Terminal presentation surface and keyboard backend.
//!
//! The word is drawn in the middle of an alternate screen in its ink color.
//! Onset is stamped after the frame has been flushed to the terminal.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
    enable_raw_mode,
};
use crossterm::{execute, queue};
use stroop_core::{FeedbackKind, StimulusItem};
use stroop_experiment::{AbortSignal, DeviceError, InputBackend, KeyEvent, PresentationSurface};
use stroop_timing::Timer;
use tracing::debug;

fn presentation(e: io::Error) -> DeviceError {
    DeviceError::Presentation(e.to_string())
}

fn input(e: io::Error) -> DeviceError {
    DeviceError::Input(e.to_string())
}

/// Owns the terminal while open: raw mode, alternate screen, hidden cursor.
/// Everything is restored on drop.
pub struct TerminalSurface<C> {
    out: Stdout,
    clock: C,
}

impl<C: Timer> TerminalSurface<C> {
    pub fn open(clock: C) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        Ok(Self { out, clock })
    }

    /// Clears the screen and centres `lines` vertically and horizontally.
    fn centered(&mut self, lines: &[&str], color: Color, bold: bool) -> io::Result<()> {
        let (cols, rows) = terminal::size()?;
        let top = (rows / 2).saturating_sub(lines.len() as u16 / 2);
        queue!(self.out, Clear(ClearType::All), SetForegroundColor(color))?;
        if bold {
            queue!(self.out, SetAttribute(Attribute::Bold))?;
        }
        for (i, line) in lines.iter().enumerate() {
            let width = line.chars().count() as u16;
            let col = cols.saturating_sub(width) / 2;
            queue!(self.out, MoveTo(col, top + i as u16), Print(line))?;
        }
        queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
        self.out.flush()
    }
}

impl<C: Timer> PresentationSurface for TerminalSurface<C> {
    fn draw_fixation(&mut self) -> Result<(), DeviceError> {
        self.centered(&["+"], Color::White, true).map_err(presentation)
    }

    fn draw_stimulus(&mut self, item: &StimulusItem) -> Result<u64, DeviceError> {
        let [r, g, b] = item.ink().rgb(item.contrast_mode());
        self.centered(&[item.word().word()], Color::Rgb { r, g, b }, true)
            .map_err(presentation)?;
        Ok(self.clock.now())
    }

    fn draw_feedback(&mut self, kind: FeedbackKind) -> Result<(), DeviceError> {
        let symbol = match kind {
            FeedbackKind::Correct => "✓",
            FeedbackKind::Incorrect => "✗",
            FeedbackKind::NoResponse => "?",
        };
        self.centered(&[symbol], Color::White, true)
            .map_err(presentation)
    }

    fn draw_rest(&mut self) -> Result<(), DeviceError> {
        self.centered(&["◯"], Color::White, false)
            .map_err(presentation)
    }

    fn show_message(&mut self, text: &str) -> Result<(), DeviceError> {
        let lines: Vec<&str> = text.lines().collect();
        self.centered(&lines, Color::White, false)
            .map_err(presentation)
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        execute!(self.out, Clear(ClearType::All)).map_err(presentation)
    }
}

impl<C> Drop for TerminalSurface<C> {
    fn drop(&mut self) {
        let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

/// Keyboard through crossterm's event queue. Esc or Ctrl-C raises the abort
/// signal instead of being reported as a response.
pub struct TerminalKeyboard<C> {
    clock: C,
    abort: AbortSignal,
}

impl<C: Timer> TerminalKeyboard<C> {
    pub fn new(clock: C, abort: AbortSignal) -> Self {
        Self { clock, abort }
    }

    /// Blocks until the space bar is pressed. Returns `false` if the
    /// experimenter quit instead.
    pub fn wait_for_start(&mut self) -> Result<bool, DeviceError> {
        loop {
            match self.poll_key(Duration::from_millis(100))? {
                Some(ev) if ev.key == ' ' => return Ok(true),
                _ if self.abort.is_raised() => return Ok(false),
                _ => {}
            }
        }
    }

    /// Reads everything queued without blocking. An early Esc still counts.
    fn drain(&self) -> Result<(), DeviceError> {
        while event::poll(Duration::ZERO).map_err(input)? {
            let _ = self.translate(event::read().map_err(input)?);
        }
        Ok(())
    }

    /// Maps one terminal event to a key press, stamped now.
    fn translate(&self, event: Event) -> Option<KeyEvent> {
        let Event::Key(key) = event else {
            return None;
        };
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match key.code {
            KeyCode::Esc => {
                debug!("escape pressed");
                self.abort.raise();
                None
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.abort.raise();
                None
            }
            KeyCode::Char(c) => Some(KeyEvent {
                key: c,
                timestamp_ns: self.clock.now(),
            }),
            _ => None,
        }
    }
}

impl<C: Timer> InputBackend for TerminalKeyboard<C> {
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError> {
        let deadline = self.clock.now().saturating_add(timeout.as_nanos() as u64);
        loop {
            let left = Duration::from_nanos(deadline.saturating_sub(self.clock.now()));
            if !event::poll(left).map_err(input)? {
                return Ok(None);
            }
            if let Some(key) = self.translate(event::read().map_err(input)?) {
                return Ok(Some(key));
            }
            if self.abort.is_raised() || left.is_zero() {
                return Ok(None);
            }
        }
    }

    fn discard_pending(&mut self) -> Result<(), DeviceError> {
        self.drain()
    }

    // Crossterm only reports Esc once its queue is read, so every wait
    // slice empties it. Keys typed outside a response window count for
    // nothing anyway.
    fn check_abort(&mut self) -> Result<(), DeviceError> {
        self.drain()
    }
}
