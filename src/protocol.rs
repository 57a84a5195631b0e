//! Wire protocol for the pump / atomizer controller
//!
//! Command wire format (ASCII, newline-terminated):
//!
//! ```text
//! <VERB> [<args>...] *<checksum>\n
//! ```
//!
//! The checksum is an XOR of every byte preceding the asterisk, encoded as
//! two uppercase hex characters. The controller echoes back either
//! `OK [<data>]` or `ERR <code> <message>`.
//!
//! Commands are immutable after construction: the raw line, checksum
//! included, is computed once in the constructor. Argument validation also
//! happens there, so an out-of-range channel or negative duration is an
//! [`Error::InvalidCommand`] and never reaches the wire. Response decoding
//! never fails; every malformed line maps to an unsuccessful [`Response`].

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub const COMMAND_TERMINATOR: char = '\n';
pub const CHECKSUM_PREFIX: char = '*';

/// Default per-command response timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Calibration holds the line open much longer.
pub const CALIBRATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Compute the XOR checksum of `payload` as two uppercase hex characters.
pub fn compute_checksum(payload: &str) -> String {
    let xor = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("{:02X}", xor)
}

/// Verify the checksum appended to `message`.
///
/// Returns true when the checksum matches, or when no checksum marker is
/// present at all (some controllers do not echo checksums).
pub fn verify_checksum(message: &str) -> bool {
    match message.rfind(CHECKSUM_PREFIX) {
        None => true,
        Some(idx) => {
            // The space separating payload from marker is not checksummed.
            let payload = message[..idx].trim_end();
            let expected = message[idx + 1..].trim();
            compute_checksum(payload).eq_ignore_ascii_case(expected)
        }
    }
}

/// Command verbs understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Begin a dispensing session.
    Start,
    /// Actuate a pump channel for a duration in ms.
    Pump,
    /// Activate an atomizer channel for a duration in ms.
    Activate,
    /// Pause between dispenses.
    Wait,
    /// Run all pumps briefly to clear lines.
    Flush,
    /// Emergency stop / end session.
    Stop,
    /// Query controller state.
    Status,
    /// Enter calibration mode for a channel.
    Calibrate,
}

impl CommandKind {
    pub fn verb(self) -> &'static str {
        match self {
            CommandKind::Start => "START",
            CommandKind::Pump => "PUMP",
            CommandKind::Activate => "ACTIVATE",
            CommandKind::Wait => "WAIT",
            CommandKind::Flush => "FLUSH",
            CommandKind::Stop => "STOP",
            CommandKind::Status => "STATUS",
            CommandKind::Calibrate => "CALIBRATE",
        }
    }
}

/// A single command, wire line precomputed. Never mutated after build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub args: Vec<String>,
    /// Full terminated wire line including checksum.
    pub raw: String,
}

impl Command {
    fn build(kind: CommandKind, args: Vec<String>) -> Command {
        let mut payload = kind.verb().to_string();
        for arg in &args {
            payload.push(' ');
            payload.push_str(arg);
        }
        let checksum = compute_checksum(&payload);
        let raw = format!("{} {}{}{}", payload, CHECKSUM_PREFIX, checksum, COMMAND_TERMINATOR);
        Command { kind, args, raw }
    }

    fn check_channel(channel: u16) -> Result<()> {
        if channel > 255 {
            return Err(Error::InvalidCommand(format!(
                "channel must be 0-255, got {}",
                channel
            )));
        }
        Ok(())
    }

    fn check_duration(duration_ms: i64) -> Result<i64> {
        if duration_ms < 0 {
            return Err(Error::InvalidCommand(format!(
                "duration must be non-negative, got {}",
                duration_ms
            )));
        }
        Ok(duration_ms)
    }

    pub fn start() -> Command {
        Command::build(CommandKind::Start, vec![])
    }

    pub fn pump(channel: u16, duration_ms: i64) -> Result<Command> {
        Self::check_channel(channel)?;
        let duration_ms = Self::check_duration(duration_ms)?;
        Ok(Command::build(
            CommandKind::Pump,
            vec![channel.to_string(), duration_ms.to_string()],
        ))
    }

    pub fn activate(channel: u16, duration_ms: i64) -> Result<Command> {
        Self::check_channel(channel)?;
        let duration_ms = Self::check_duration(duration_ms)?;
        Ok(Command::build(
            CommandKind::Activate,
            vec![channel.to_string(), duration_ms.to_string()],
        ))
    }

    pub fn wait(ms: i64) -> Result<Command> {
        let ms = Self::check_duration(ms)?;
        Ok(Command::build(CommandKind::Wait, vec![ms.to_string()]))
    }

    pub fn flush() -> Command {
        Command::build(CommandKind::Flush, vec![])
    }

    pub fn stop() -> Command {
        Command::build(CommandKind::Stop, vec![])
    }

    pub fn status() -> Command {
        Command::build(CommandKind::Status, vec![])
    }

    pub fn calibrate(channel: u16) -> Result<Command> {
        Self::check_channel(channel)?;
        Ok(Command::build(
            CommandKind::Calibrate,
            vec![channel.to_string()],
        ))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw.trim_end())
    }
}

/// Response status codes from the controller.
///
/// The `E01..E09` values are a device contract; other components branch on
/// them and they must never be renumbered. An unrecognized wire token
/// decodes to [`ResponseCode::Device`] so a newer controller firmware
/// cannot make decoding fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    UnknownCommand,
    BadArguments,
    ChannelOutOfBounds,
    DurationOutOfBounds,
    Busy,
    NotStarted,
    ChecksumMismatch,
    HardwareFault,
    Timeout,
    /// A code this host does not know; raw token preserved.
    Device(String),
}

impl ResponseCode {
    pub fn as_wire(&self) -> &str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::UnknownCommand => "E01",
            ResponseCode::BadArguments => "E02",
            ResponseCode::ChannelOutOfBounds => "E03",
            ResponseCode::DurationOutOfBounds => "E04",
            ResponseCode::Busy => "E05",
            ResponseCode::NotStarted => "E06",
            ResponseCode::ChecksumMismatch => "E07",
            ResponseCode::HardwareFault => "E08",
            ResponseCode::Timeout => "E09",
            ResponseCode::Device(raw) => raw,
        }
    }

    pub fn from_wire(token: &str) -> ResponseCode {
        match token {
            "OK" => ResponseCode::Ok,
            "E01" => ResponseCode::UnknownCommand,
            "E02" => ResponseCode::BadArguments,
            "E03" => ResponseCode::ChannelOutOfBounds,
            "E04" => ResponseCode::DurationOutOfBounds,
            "E05" => ResponseCode::Busy,
            "E06" => ResponseCode::NotStarted,
            "E07" => ResponseCode::ChecksumMismatch,
            "E08" => ResponseCode::HardwareFault,
            "E09" => ResponseCode::Timeout,
            other => ResponseCode::Device(other.to_string()),
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// Parsed response from the controller.
#[derive(Debug, Clone)]
pub struct Response {
    pub success: bool,
    pub code: ResponseCode,
    pub message: String,
    /// Opaque trailing data after `OK`, if any.
    pub data: Option<String>,
    pub raw: String,
    /// Round-trip latency when the caller supplied a send timestamp.
    pub latency: Duration,
}

impl Response {
    fn failure(code: ResponseCode, message: String, raw: &str, latency: Duration) -> Response {
        Response {
            success: false,
            code,
            message,
            data: None,
            raw: raw.to_string(),
            latency,
        }
    }

    /// Decode a raw response line.
    ///
    /// Never fails: an empty line is a timeout, a bad checksum is a
    /// checksum error, and any unrecognized shape is an unknown-command
    /// failure carrying the offending text.
    pub fn parse(raw: &str, started: Option<Instant>) -> Response {
        let latency = started.map(|t| t.elapsed()).unwrap_or_default();

        let mut stripped = raw.trim();
        if stripped.is_empty() {
            return Response::failure(
                ResponseCode::Timeout,
                "Empty response (possible timeout)".to_string(),
                raw,
                latency,
            );
        }

        if let Some(idx) = stripped.rfind(CHECKSUM_PREFIX) {
            if !verify_checksum(stripped) {
                return Response::failure(
                    ResponseCode::ChecksumMismatch,
                    "Response checksum mismatch".to_string(),
                    raw,
                    latency,
                );
            }
            stripped = stripped[..idx].trim();
        }

        if let Some(rest) = stripped.strip_prefix("OK") {
            let data = rest.trim();
            return Response {
                success: true,
                code: ResponseCode::Ok,
                message: "Command accepted".to_string(),
                data: if data.is_empty() {
                    None
                } else {
                    Some(data.to_string())
                },
                raw: raw.to_string(),
                latency,
            };
        }

        if let Some(rest) = stripped.strip_prefix("ERR") {
            // Tolerate whitespace runs between the tokens.
            let rest = rest.trim_start();
            let mut parts = rest.splitn(2, char::is_whitespace);
            let code = parts.next().filter(|s| !s.is_empty()).unwrap_or("E00");
            let message = parts
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown error");
            return Response::failure(
                ResponseCode::from_wire(code),
                message.to_string(),
                raw,
                latency,
            );
        }

        Response::failure(
            ResponseCode::UnknownCommand,
            format!("Unexpected response format: {}", stripped),
            raw,
            latency,
        )
    }
}

/// Ordered list of commands forming a complete dispensing sequence.
///
/// Used for planning and display; execution sends commands one at a time
/// through the transport.
#[derive(Debug, Clone, Default)]
pub struct CommandSequence {
    commands: Vec<Command>,
}

impl CommandSequence {
    pub fn new() -> Self {
        CommandSequence::default()
    }

    pub fn add_start(&mut self) -> &mut Self {
        self.commands.push(Command::start());
        self
    }

    pub fn add_pump(&mut self, channel: u16, duration_ms: i64) -> Result<&mut Self> {
        self.commands.push(Command::pump(channel, duration_ms)?);
        Ok(self)
    }

    pub fn add_activate(&mut self, channel: u16, duration_ms: i64) -> Result<&mut Self> {
        self.commands.push(Command::activate(channel, duration_ms)?);
        Ok(self)
    }

    pub fn add_wait(&mut self, ms: i64) -> Result<&mut Self> {
        self.commands.push(Command::wait(ms)?);
        Ok(self)
    }

    pub fn add_flush(&mut self) -> &mut Self {
        self.commands.push(Command::flush());
        self
    }

    pub fn add_stop(&mut self) -> &mut Self {
        self.commands.push(Command::stop());
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Estimated total duration: PUMP/ACTIVATE and WAIT argument sums.
    pub fn estimated_duration_ms(&self) -> i64 {
        self.commands
            .iter()
            .map(|cmd| {
                let arg = match cmd.kind {
                    CommandKind::Pump | CommandKind::Activate => cmd.args.get(1),
                    CommandKind::Wait => cmd.args.first(),
                    _ => None,
                };
                arg.and_then(|a| a.parse::<i64>().ok()).unwrap_or(0)
            })
            .sum()
    }
}

impl<'a> IntoIterator for &'a CommandSequence {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
