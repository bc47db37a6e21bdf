//! Real-time playback against wall-clock time

use crate::error::Result;
use crate::opl::{RegisterSink, VOICE_COUNT};
use crate::player::{PlaybackEvent, PlaybackSession, TickOutcome, PLAY_UNITS_PER_SECOND};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sleep between transport iterations
pub const FRAME: Duration = Duration::from_millis(10);

/// Ticks run per catch-up before yielding back to the loop
pub const MAX_TICKS_PER_UPDATE: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Restart from the loop anchor when the song ends
    pub looping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUp {
    Playing,
    Ended,
}

/// Count `elapsed_units` against the pending wait and tick until ahead again
pub fn catch_up<S: RegisterSink>(
    session: &mut PlaybackSession<S>,
    elapsed_units: f64,
    looping: bool,
) -> CatchUp {
    if session.has_begun() {
        session.consume_wait(elapsed_units);
    }

    let mut ticks = 0;
    while session.play_wait() < 0.5 {
        if session.tick() == TickOutcome::Finished {
            if !(looping && session.has_begun()) {
                return CatchUp::Ended;
            }
            session.rewind();
        }
        ticks += 1;
        if ticks >= MAX_TICKS_PER_UPDATE {
            log::warn!("Scheduler made no progress in {ticks} ticks");
            break;
        }
    }
    CatchUp::Playing
}

/// Keyboard commands understood during playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    TogglePause,
    Louder,
    Quieter,
    ToggleNormalize,
}

impl Command {
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Command::Quit)
            }
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Command::Quit),
            KeyCode::Char(' ') => Some(Command::TogglePause),
            KeyCode::Char('+') | KeyCode::Char('=') => Some(Command::Louder),
            KeyCode::Char('-') => Some(Command::Quieter),
            KeyCode::Char('n') | KeyCode::Char('N') => Some(Command::ToggleNormalize),
            _ => None,
        }
    }
}

/// Shared request to end playback
///
/// Setting it is all a key handler does; the transport loop notices it on
/// its next iteration and tears down.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Keeps the terminal in raw mode for its lifetime
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// One character per voice: `.` idle, `#` sounding, `&` after pressure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceMeter {
    cells: [char; VOICE_COUNT],
}

impl Default for VoiceMeter {
    fn default() -> Self {
        Self {
            cells: ['.'; VOICE_COUNT],
        }
    }
}

impl VoiceMeter {
    pub fn apply(&mut self, event: &PlaybackEvent) {
        let (voice, cell) = match *event {
            PlaybackEvent::NoteOn { voice, .. } => (voice, '#'),
            PlaybackEvent::NoteOff { voice, .. } => (voice, '.'),
            PlaybackEvent::Pressure { voice, .. } => (voice, '&'),
            _ => return,
        };
        if let Some(slot) = self.cells.get_mut(voice) {
            *slot = cell;
        }
    }

    pub fn line(&self) -> String {
        self.cells.iter().collect()
    }
}

/// Interactive state between key presses
#[derive(Debug, Default)]
pub struct Transport {
    paused: bool,
    meter: VoiceMeter,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn meter(&self) -> &VoiceMeter {
        &self.meter
    }

    pub fn handle<S: RegisterSink>(
        &mut self,
        session: &mut PlaybackSession<S>,
        command: Command,
        stop: &StopFlag,
    ) {
        match command {
            Command::Quit => stop.stop(),
            Command::TogglePause => self.paused = !self.paused,
            Command::Louder => session.set_output_level(session.output_level().louder()),
            Command::Quieter => session.set_output_level(session.output_level().quieter()),
            Command::ToggleNormalize => {
                session.set_output_level(session.output_level().toggle_normalize())
            }
        }
        log::debug!("{command:?} -> {:?}", session.output_level());
    }

    /// Advance playback by `elapsed` wall time and refresh the meter
    pub fn update<S: RegisterSink>(
        &mut self,
        session: &mut PlaybackSession<S>,
        elapsed: Duration,
        options: &TransportOptions,
        stop: &StopFlag,
    ) {
        if !self.paused {
            let units = elapsed.as_secs_f64() * PLAY_UNITS_PER_SECOND;
            if catch_up(session, units, options.looping) == CatchUp::Ended {
                stop.stop();
            }
        }
        for event in session.drain_events() {
            self.meter.apply(&event);
        }
    }

    pub fn status_line<S: RegisterSink>(&self, session: &PlaybackSession<S>) -> String {
        let output = session.output_level();
        format!(
            "[{}] vol {:>3}% norm {:<3}{}",
            self.meter.line(),
            output.gain_percent,
            if output.normalize { "on" } else { "off" },
            if self.paused { " paused" } else { "" }
        )
    }
}

/// Play until the song ends or `stop` is set, reading keys from the terminal
pub fn run<S: RegisterSink>(
    session: &mut PlaybackSession<S>,
    options: &TransportOptions,
    stop: &StopFlag,
) -> Result<()> {
    let guard = RawModeGuard::enable()?;
    let mut stdout = io::stdout();
    let result = play(session, options, stop, &mut stdout, read_command);
    drop(guard);
    let newline = writeln!(stdout);
    result?;
    newline?;
    Ok(())
}

/// Drain pending terminal input, returning the first recognised command
fn read_command() -> Result<Option<Command>> {
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key) = event::read()? {
            if let Some(command) = Command::from_key(&key) {
                return Ok(Some(command));
            }
        }
    }
    Ok(None)
}

/// Drive the transport loop, then silence the chip however the loop ended
pub fn play<S, W, F>(
    session: &mut PlaybackSession<S>,
    options: &TransportOptions,
    stop: &StopFlag,
    out: &mut W,
    next_command: F,
) -> Result<()>
where
    S: RegisterSink,
    W: Write,
    F: FnMut() -> Result<Option<Command>>,
{
    let result = play_loop(session, options, stop, out, next_command);
    session.silence();
    if let Err(e) = &result {
        log::error!("Playback interrupted: {e}");
    }
    result
}

fn play_loop<S, W, F>(
    session: &mut PlaybackSession<S>,
    options: &TransportOptions,
    stop: &StopFlag,
    out: &mut W,
    mut next_command: F,
) -> Result<()>
where
    S: RegisterSink,
    W: Write,
    F: FnMut() -> Result<Option<Command>>,
{
    let mut transport = Transport::new();
    let mut last = Instant::now();

    while !stop.is_stopped() {
        while let Some(command) = next_command()? {
            transport.handle(session, command, stop);
        }

        let now = Instant::now();
        transport.update(session, now - last, options, stop);
        last = now;

        write!(out, "\r{}", transport.status_line(session))?;
        out.flush()?;
        std::thread::sleep(FRAME);
    }
    Ok(())
}
