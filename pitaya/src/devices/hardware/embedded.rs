use crate::{
    devices::hardware::serial::SerialChannel, messages::control::plant::ACKNOWLEDGEMENT, Result,
};
use log::{debug, warn};
use std::time::{Duration, Instant};

/// Longest line we will hold on to while waiting for its newline. Plant
/// identifiers are short, anything longer is line noise.
const MAX_LINE_BYTES: usize = 256;

/// The scanning rig as seen by the session controller: a source of
/// identifier lines and a sink for acknowledgements.
///
/// The rig must not send a new identifier before it has received the
/// acknowledgement for the previous one, so at most one plant is ever
/// in flight.
pub trait PlantSignal {
    /// Wait up to `timeout` for the next non empty line. `Ok(None)` means
    /// the rig had nothing to say.
    fn next_line(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Tell the rig the current plant is done and it can move on.
    fn acknowledge(&mut self) -> Result<()>;
}

/// Line oriented link to the embedded controller on the scanning rig.
pub struct EmbeddedLink<S: SerialChannel> {
    /// Serial channel to the controller.
    channel: S,
    /// Bytes received that have not formed a complete line yet.
    pending: Vec<u8>,
}

impl<S: SerialChannel> EmbeddedLink<S> {
    /// Create a link over an open channel.
    ///
    /// * `channel`: serial channel to the controller.
    pub fn new(channel: S) -> Self {
        Self {
            channel,
            pending: Vec::new(),
        }
    }

    /// Pop the next complete, non blank line out of the pending bytes.
    fn take_line(&mut self) -> Option<String> {
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        if self.pending.len() > MAX_LINE_BYTES {
            warn!(
                "Discarding {} bytes from controller without a line ending",
                self.pending.len()
            );
            self.pending.clear();
        }
        None
    }
}

impl<S: SerialChannel> PlantSignal for EmbeddedLink<S> {
    fn next_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.take_line() {
                debug!("Received from controller: {line:?}");
                return Ok(Some(line));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.channel.read_available(&mut self.pending, deadline - now)?;
        }
    }

    fn acknowledge(&mut self) -> Result<()> {
        self.channel.write_all(ACKNOWLEDGEMENT)?;
        Ok(())
    }
}
