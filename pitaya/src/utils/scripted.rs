use crate::devices::hardware::serial::SerialChannel;
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

/// How long an idle read sleeps before reporting that nothing arrived,
/// enough to keep deadline loops from spinning hot.
const IDLE_READ: Duration = Duration::from_millis(1);

/// A canned response queued whenever a write contains its trigger.
struct Reply {
    trigger: Vec<u8>,
    response: Vec<u8>,
}

#[derive(Default)]
struct ScriptState {
    /// Bytes the peer has sent that have not been read yet.
    inbound: VecDeque<u8>,
    /// Everything written to the peer, in order.
    written: Vec<u8>,
    replies: Vec<Reply>,
    /// Number of times the buffers were cleared.
    clears: usize,
    /// When set every write fails as if the cable was pulled.
    broken: bool,
}

/// Serial peer driven by a script instead of hardware. Cloning gives a
/// second handle onto the same peer, so a test can hand one handle to a
/// link and keep the other to inspect the traffic afterwards.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes as if the peer had sent them unprompted.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes);
    }

    /// Answer with `response` every time a single write contains `trigger`.
    pub fn reply_to(self, trigger: &str, response: &str) -> Self {
        self.state().replies.push(Reply {
            trigger: trigger.as_bytes().to_vec(),
            response: response.as_bytes().to_vec(),
        });
        self
    }

    /// Make every following write fail.
    pub fn break_link(&self) {
        self.state().broken = true;
    }

    /// Everything written to the peer so far.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Everything written to the peer so far, decoded lossily.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    /// How many times the link asked for its buffers to be cleared.
    pub fn clear_count(&self) -> usize {
        self.state().clears
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

impl SerialChannel for ScriptedChannel {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted link broken"));
        }
        state.written.extend_from_slice(bytes);
        let responses: Vec<Vec<u8>> = state
            .replies
            .iter()
            .filter(|reply| contains(bytes, &reply.trigger))
            .map(|reply| reply.response.clone())
            .collect();
        for response in responses {
            state.inbound.extend(response);
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut Vec<u8>, timeout: Duration) -> io::Result<usize> {
        let pending: Vec<u8> = self.state().inbound.drain(..).collect();
        if pending.is_empty() {
            thread::sleep(timeout.min(IDLE_READ));
        }
        buf.extend_from_slice(&pending);
        Ok(pending.len())
    }

    fn clear(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.inbound.clear();
        state.clears += 1;
        Ok(())
    }
}
