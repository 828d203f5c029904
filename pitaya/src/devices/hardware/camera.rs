use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs::create_dir_all,
    path::Path,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

/// Placeholder in the argument template replaced by the destination path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How often a running capture is checked for completion.
const CAPTURE_POLL: Duration = Duration::from_millis(50);

fn default_timeout_ms() -> u64 {
    10_000
}

/// Configuration of the still camera. The camera is driven through an
/// external capture program (libcamera on the Raspberry Pi) rather than
/// a driver, so the config is the command line to run.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Capture program to run.
    pub program: String,
    /// Arguments, with `{output}` standing in for the image path.
    pub args: Vec<String>,
    /// Longest the capture program may run before it is killed.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl CaptureConfig {
    /// Create a new capture config.
    ///
    /// * `program`: capture program to run.
    /// * `args`: argument template, see [`OUTPUT_PLACEHOLDER`].
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Set the capture timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for CaptureConfig {
    /// `libcamera-jpeg -o {output} --nopreview` with a ten second limit.
    fn default() -> Self {
        Self::new("libcamera-jpeg", ["-o", OUTPUT_PLACEHOLDER, "--nopreview"])
    }
}

/// Anything that can put a picture of the current plant at a path.
pub trait ImageCapture {
    /// Capture to `destination`. Never fails loudly: any problem is
    /// logged and reported as `false`.
    fn capture(&self, destination: &Path) -> bool;
}

/// Still camera driven by an external capture program.
pub struct CaptureService {
    config: CaptureConfig,
}

impl CaptureService {
    /// Create a new capture service by consuming a config.
    ///
    /// * `config`: capture command and timeout.
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Argument list for one capture with the destination filled in.
    fn args_for(&self, destination: &Path) -> Vec<String> {
        let output = destination.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect()
    }
}

impl ImageCapture for CaptureService {
    fn capture(&self, destination: &Path) -> bool {
        if let Some(parent) = destination.parent() {
            if let Err(e) = create_dir_all(parent) {
                warn!("Capture failed, cannot create {:?}: {e}", parent);
                return false;
            }
        }

        let mut child = match Command::new(&self.config.program)
            .args(self.args_for(destination))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Capture failed, could not start {}: {e}", self.config.program);
                return false;
            }
        };

        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        "Capture failed, {} still running after {}ms",
                        self.config.program, self.config.timeout_ms
                    );
                    // Reap the child so it does not linger as a zombie.
                    if let Err(e) = child.kill().and_then(|_| child.wait()) {
                        warn!("Failed to stop capture process: {e}");
                    }
                    return false;
                }
                Ok(None) => thread::sleep(CAPTURE_POLL),
                Err(e) => {
                    warn!("Capture failed, lost track of {}: {e}", self.config.program);
                    return false;
                }
            }
        };

        if !status.success() {
            warn!("Capture failed, {} exited with {status}", self.config.program);
            false
        } else if !destination.is_file() {
            warn!(
                "Capture failed, {} exited cleanly but wrote no image to {:?}",
                self.config.program, destination
            );
            false
        } else {
            info!("Captured image to {:?}", destination);
            true
        }
    }
}
