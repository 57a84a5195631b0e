//! Serial plan execution
//!
//! Drives a pump controller board through the wire protocol. The serial
//! line is strictly synchronous request/response, one command at a time;
//! pipelining is not supported. A failed PUMP aborts the remaining plan,
//! a failed inter-pump WAIT is logged and ignored, and STOP is always
//! sent before returning so the board never keeps running after an abort.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{FLUSH_DURATION_MS, INTER_PUMP_DELAY_MS};
use crate::error::Result;
use crate::plan::Plan;
use crate::protocol::{Command, Response, ResponseCode, DEFAULT_TIMEOUT};

/// A synchronous wire exchange: send one line, wait for one reply.
///
/// Implementations own reconnection and framing; a transport-level
/// failure (port gone, write error) is an `Err`, while a device-reported
/// problem comes back as a normal response line.
pub trait Transport: Send {
    fn exchange(&mut self, line: &str, timeout: Duration) -> Result<String>;
}

/// Executes liquid dispensing plans over a [`Transport`].
pub struct SerialDispenser<T: Transport> {
    transport: T,
}

impl<T: Transport> SerialDispenser<T> {
    pub fn new(transport: T) -> Self {
        SerialDispenser { transport }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send one command and decode whatever comes back.
    ///
    /// Transport failures are folded into a hardware-fault response, so
    /// callers branch on one shape only.
    fn send(&mut self, command: &Command, timeout: Duration) -> Response {
        let started = Instant::now();
        debug!(tx = %command, "sending");
        match self.transport.exchange(&command.raw, timeout) {
            Ok(raw) => {
                let response = Response::parse(&raw, Some(started));
                debug!(rx = %raw.trim(), success = response.success, "received");
                response
            }
            Err(err) => Response {
                success: false,
                code: ResponseCode::HardwareFault,
                message: format!("Transport error: {}", err),
                data: None,
                raw: String::new(),
                latency: started.elapsed(),
            },
        }
    }

    /// Execute a dispensing plan.
    ///
    /// Returns `Ok(true)` when every step completed. An empty plan sends
    /// nothing and returns `Ok(false)`.
    pub fn execute(&mut self, plan: &Plan) -> Result<bool> {
        if plan.is_empty() {
            warn!(formula = %plan.formula_name, "no dispensable steps in plan, nothing to do");
            return Ok(false);
        }

        let start = self.send(&Command::start(), DEFAULT_TIMEOUT);
        if !start.success {
            error!(code = %start.code, message = %start.message, "START command failed");
            return Ok(false);
        }

        let mut success = true;
        for (idx, step) in plan.steps.iter().enumerate() {
            info!(
                step = idx + 1,
                of = plan.steps.len(),
                ingredient = %step.ingredient,
                channel = step.channel,
                duration_ms = step.duration_ms,
                "dispensing"
            );

            let pump = Command::pump(step.channel as u16, step.duration_ms as i64)?;
            // The board only replies once the pump run finishes.
            let timeout = Duration::from_millis(step.duration_ms) + DEFAULT_TIMEOUT;
            let response = self.send(&pump, timeout);
            if !response.success {
                error!(
                    ingredient = %step.ingredient,
                    channel = step.channel,
                    code = %response.code,
                    message = %response.message,
                    "PUMP command failed, aborting plan"
                );
                success = false;
                break;
            }

            // Inter-pump settling delay; a failed WAIT is not worth an abort.
            let wait = Command::wait(INTER_PUMP_DELAY_MS as i64)?;
            let wait_resp = self.send(&wait, DEFAULT_TIMEOUT);
            if !wait_resp.success {
                warn!(code = %wait_resp.code, "WAIT command failed, continuing");
            }
        }

        let stop = self.send(&Command::stop(), DEFAULT_TIMEOUT);
        if !stop.success {
            warn!(code = %stop.code, message = %stop.message, "STOP command returned failure");
        }

        Ok(success)
    }

    /// Run all pumps briefly to clear the lines.
    pub fn flush(&mut self) -> Result<bool> {
        info!(duration_ms = FLUSH_DURATION_MS, "flushing lines");
        let start = self.send(&Command::start(), DEFAULT_TIMEOUT);
        if !start.success {
            error!(code = %start.code, "START before flush failed");
            return Ok(false);
        }
        let timeout = Duration::from_millis(FLUSH_DURATION_MS) + DEFAULT_TIMEOUT;
        let flush = self.send(&Command::flush(), timeout);
        let stop = self.send(&Command::stop(), DEFAULT_TIMEOUT);
        if !stop.success {
            warn!(code = %stop.code, "STOP after flush returned failure");
        }
        Ok(flush.success)
    }
}

/// In-memory transport: records every sent line and replies from a script,
/// defaulting to `OK` once the script runs dry.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    sent: Vec<String>,
    script: std::collections::VecDeque<String>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        SimulatedTransport::default()
    }

    /// Queue a canned response for an upcoming exchange.
    pub fn push_response(&mut self, line: &str) {
        self.script.push_back(line.to_string());
    }

    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// The verb of each sent line, for compact assertions.
    pub fn sent_verbs(&self) -> Vec<&str> {
        self.sent
            .iter()
            .map(|l| l.split_whitespace().next().unwrap_or(""))
            .collect()
    }
}

impl Transport for SimulatedTransport {
    fn exchange(&mut self, line: &str, _timeout: Duration) -> Result<String> {
        self.sent.push(line.trim_end().to_string());
        Ok(self
            .script
            .pop_front()
            .unwrap_or_else(|| "OK\n".to_string()))
    }
}
