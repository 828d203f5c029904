use crate::{
    devices::hardware::serial::{SerialChannel, SerialConfig},
    PitayaError, Result,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    io,
    time::{Duration, Instant},
};

/// Ctrl+Z, ends the message body in SMS text mode.
const SMS_TERMINATOR: u8 = 0x1A;
/// Prompt the modem prints when it is ready for the message body.
const BODY_PROMPT: char = '>';
/// Marker the modem prints once a message has been handed to the network.
const SEND_ACCEPTED: &str = "+CMGS";
/// Marker the modem prints when it refuses a command.
const SEND_ERROR: &str = "ERROR";

fn default_command_window_ms() -> u64 {
    1000
}

fn default_prompt_timeout_ms() -> u64 {
    5000
}

fn default_response_timeout_ms() -> u64 {
    10000
}

/// Configuration for the GSM modem. The timings bound each step of the
/// send handshake so a wedged modem costs at most one slow send.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ModemConfig {
    /// Serial port the modem is attached to.
    pub serial: SerialConfig,
    /// Time spent collecting the reply to each setup command.
    #[serde(default = "default_command_window_ms")]
    pub command_window_ms: u64,
    /// Longest wait for the `>` prompt after `AT+CMGS`.
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,
    /// Longest wait for `+CMGS` or `ERROR` after the body is sent.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl ModemConfig {
    /// Create a modem config with the default handshake timings.
    ///
    /// * `serial`: port settings for the modem.
    pub fn new(serial: SerialConfig) -> Self {
        Self {
            serial,
            command_window_ms: default_command_window_ms(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }

    /// Override every handshake timing at once, mostly useful for tests.
    pub fn with_timings(
        mut self,
        command_window_ms: u64,
        prompt_timeout_ms: u64,
        response_timeout_ms: u64,
    ) -> Self {
        self.command_window_ms = command_window_ms;
        self.prompt_timeout_ms = prompt_timeout_ms;
        self.response_timeout_ms = response_timeout_ms;
        self
    }
}

/// Check a phone number is something the modem will accept inside
/// `AT+CMGS="..."`: an optional `+` then 3 to 15 digits.
///
/// * `number`: recipient as written in the config.
pub fn validate_recipient(number: &str) -> Result<()> {
    let digits = number.strip_prefix('+').unwrap_or(number);
    if (3..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PitayaError::InvalidRecipient(number.to_string()))
    }
}

/// What the modem said after the message body was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// `+CMGS` seen, with the message reference when the modem gave one.
    Accepted { reference: Option<u16> },
    /// `ERROR` seen without `+CMGS`.
    Rejected,
    /// Neither marker arrived before the response timeout.
    NoResponse,
}

impl SendStatus {
    /// Classify the text accumulated after sending the body.
    pub fn from_response(response: &str) -> Self {
        if let Some(start) = response.find(SEND_ACCEPTED) {
            let reference = response[start + SEND_ACCEPTED.len()..]
                .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
                .split(|c: char| !c.is_ascii_digit())
                .next()
                .and_then(|digits| digits.parse().ok());
            SendStatus::Accepted { reference }
        } else if response.contains(SEND_ERROR) {
            SendStatus::Rejected
        } else {
            SendStatus::NoResponse
        }
    }
}

/// Anything that can deliver a short text message. The session
/// controller only ever needs to know whether delivery was accepted.
pub trait SmsNotifier {
    /// Send `body` to `recipient`. Never fails loudly: any problem is
    /// logged and reported as `false`.
    fn send_text(&mut self, recipient: &str, body: &str) -> bool;
}

/// Request/response link to a SIM800 style GSM modem.
pub struct ModemLink<S: SerialChannel> {
    /// Serial channel to the modem.
    channel: S,
    command_window: Duration,
    prompt_timeout: Duration,
    response_timeout: Duration,
}

impl<S: SerialChannel> ModemLink<S> {
    /// Create a modem link over an open channel.
    ///
    /// * `channel`: serial channel to the modem.
    /// * `config`: handshake timings.
    pub fn new(channel: S, config: &ModemConfig) -> Self {
        Self {
            channel,
            command_window: Duration::from_millis(config.command_window_ms),
            prompt_timeout: Duration::from_millis(config.prompt_timeout_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
        }
    }

    /// Run the full text mode send handshake and report what the modem
    /// answered. Only I/O faults on the port are errors.
    ///
    /// * `recipient`: phone number.
    /// * `body`: message text.
    pub fn exchange(&mut self, recipient: &str, body: &str) -> io::Result<SendStatus> {
        self.channel.clear()?;

        // Probe, echo off, text mode. Replies are drained but not checked,
        // a modem that misses one of these usually still sends.
        self.command("AT")?;
        self.command("ATE0")?;
        self.command("AT+CMGF=1")?;

        self.channel
            .write_all(format!("AT+CMGS=\"{recipient}\"\r\n").as_bytes())?;
        let prompt = self.collect(self.prompt_timeout, |reply| reply.contains(BODY_PROMPT))?;
        if !prompt.contains(BODY_PROMPT) {
            warn!("No '>' prompt from modem, continuing anyway...");
        }

        let mut payload = body.as_bytes().to_vec();
        payload.push(SMS_TERMINATOR);
        self.channel.write_all(&payload)?;

        let response = self.collect(self.response_timeout, |reply| {
            reply.contains(SEND_ACCEPTED) || reply.contains(SEND_ERROR)
        })?;
        debug!("Modem response {:?}", response);
        Ok(SendStatus::from_response(&response))
    }

    /// Write one command and drain whatever comes back for the command window.
    fn command(&mut self, command: &str) -> io::Result<String> {
        self.channel.write_all(format!("{command}\r\n").as_bytes())?;
        let reply = self.collect(self.command_window, |_| false)?;
        debug!("{command} -> {:?}", reply.trim());
        Ok(reply)
    }

    /// Accumulate modem output until `done` holds or `window` elapses.
    fn collect<F>(&mut self, window: Duration, done: F) -> io::Result<String>
    where
        F: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + window;
        let mut raw = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.channel.read_available(&mut raw, deadline - now)? > 0
                && done(&String::from_utf8_lossy(&raw))
            {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl<S: SerialChannel> SmsNotifier for ModemLink<S> {
    fn send_text(&mut self, recipient: &str, body: &str) -> bool {
        info!("Sending SMS to {recipient}...");
        match self.exchange(recipient, body) {
            Ok(SendStatus::Accepted { reference }) => {
                info!("Modem accepted SMS to {recipient} (reference {reference:?})");
                true
            }
            Ok(SendStatus::Rejected) => {
                warn!("Modem rejected SMS to {recipient}");
                false
            }
            Ok(SendStatus::NoResponse) => {
                warn!("No response from modem for SMS to {recipient}");
                false
            }
            Err(e) => {
                warn!("Modem send error: {e}");
                false
            }
        }
    }
}
