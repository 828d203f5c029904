use crate::{
    components::field_station::detection_log::{DetectionLog, DetectionLogConfig},
    devices::{
        hardware::{
            camera::{CaptureConfig, CaptureService, ImageCapture},
            embedded::{EmbeddedLink, PlantSignal},
            modem::{validate_recipient, ModemConfig, ModemLink, SmsNotifier},
            serial::{SerialConfig, SerialLink},
        },
        software::classifier::{ClassifierConfig, ClassifierService, DiseaseClassifier},
    },
    messages::{
        control::plant::PlantId,
        records::detection::{ClassificationResult, DetectionRecord},
    },
    PitayaError, Result,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use strum_macros::{Display, EnumIter, IntoStaticStr};
use uuid::Uuid;

/// Longest wait any timing in the station config may ask for.
pub const MAX_WAIT_MS: u64 = 3_600_000;

fn default_survey_day() -> u32 {
    1
}

fn default_idle_poll_ms() -> u64 {
    100
}

fn default_inter_session_pause_ms() -> u64 {
    1000
}

fn default_fault_backoff_ms() -> u64 {
    1000
}

/// Configuration for the whole field station: where captures and the log
/// go, who gets told about each plant, and the devices to do it with.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PlantMonitorConfig {
    /// Directory holding the captures and the detection log.
    pub image_dir: PathBuf,
    /// Day of the survey, used in capture file names.
    #[serde(default = "default_survey_day")]
    pub survey_day: u32,
    /// Farmer's phone number.
    pub farmer_number: String,
    /// Control unit's phone number.
    pub control_unit_number: String,
    /// How long to wait for an identifier before polling again.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Pause after a completed plant so the rig can move on.
    #[serde(default = "default_inter_session_pause_ms")]
    pub inter_session_pause_ms: u64,
    /// Pause after an unexpected fault before listening again.
    #[serde(default = "default_fault_backoff_ms")]
    pub fault_backoff_ms: u64,
    /// Serial link to the embedded controller on the rig.
    pub embedded: SerialConfig,
    /// GSM modem used for notifications.
    pub modem: ModemConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub detection_log: DetectionLogConfig,
}

impl PlantMonitorConfig {
    /// Plant monitor configuration with default timings, capture command
    /// and log name.
    ///
    /// * `image_dir`: directory for captures and the log.
    /// * `farmer_number`: farmer's phone number.
    /// * `control_unit_number`: control unit's phone number.
    /// * `embedded`: serial settings for the rig controller.
    /// * `modem`: modem settings.
    /// * `classifier`: model settings.
    pub fn new(
        image_dir: impl Into<PathBuf>,
        farmer_number: impl Into<String>,
        control_unit_number: impl Into<String>,
        embedded: SerialConfig,
        modem: ModemConfig,
        classifier: ClassifierConfig,
    ) -> Self {
        Self {
            image_dir: image_dir.into(),
            survey_day: default_survey_day(),
            farmer_number: farmer_number.into(),
            control_unit_number: control_unit_number.into(),
            idle_poll_ms: default_idle_poll_ms(),
            inter_session_pause_ms: default_inter_session_pause_ms(),
            fault_backoff_ms: default_fault_backoff_ms(),
            embedded,
            modem,
            capture: CaptureConfig::default(),
            classifier,
            detection_log: DetectionLogConfig::default(),
        }
    }

    /// Set the survey day used in capture file names.
    pub fn with_survey_day(mut self, survey_day: u32) -> Self {
        self.survey_day = survey_day;
        self
    }

    /// Set the idle poll, inter session pause and fault backoff.
    pub fn with_loop_timings(
        mut self,
        idle_poll_ms: u64,
        inter_session_pause_ms: u64,
        fault_backoff_ms: u64,
    ) -> Self {
        self.idle_poll_ms = idle_poll_ms;
        self.inter_session_pause_ms = inter_session_pause_ms;
        self.fault_backoff_ms = fault_backoff_ms;
        self
    }

    /// Build and validate the config by reading a file.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        let file = Path::new(&filepath);
        if !file.is_file() {
            return Err(PitayaError::ConfigMissing(file.to_path_buf()));
        }
        let config = config::Config::builder()
            .add_source(config::File::new(
                &file.to_string_lossy(),
                config::FileFormat::Yaml,
            ))
            .build()?
            .try_deserialize::<PlantMonitorConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the station could not run with.
    pub fn validate(&self) -> Result<()> {
        validate_recipient(&self.farmer_number)?;
        validate_recipient(&self.control_unit_number)?;
        for (name, wait_ms) in self.waits() {
            if wait_ms > MAX_WAIT_MS {
                return Err(PitayaError::InvalidConfig(format!(
                    "{name} of {wait_ms}ms is over the {MAX_WAIT_MS}ms limit"
                )));
            }
        }
        self.classifier.validate()
    }

    /// Every timing in the config that ends up as a deadline or a sleep.
    fn waits(&self) -> [(&'static str, u64); 11] {
        [
            ("idle_poll_ms", self.idle_poll_ms),
            ("inter_session_pause_ms", self.inter_session_pause_ms),
            ("fault_backoff_ms", self.fault_backoff_ms),
            ("embedded.read_timeout_ms", self.embedded.read_timeout_ms),
            ("embedded.settle_ms", self.embedded.settle_ms),
            ("modem.serial.read_timeout_ms", self.modem.serial.read_timeout_ms),
            ("modem.serial.settle_ms", self.modem.serial.settle_ms),
            ("modem.command_window_ms", self.modem.command_window_ms),
            ("modem.prompt_timeout_ms", self.modem.prompt_timeout_ms),
            ("modem.response_timeout_ms", self.modem.response_timeout_ms),
            ("capture.timeout_ms", self.capture.timeout_ms),
        ]
    }
}

/// Where a session currently is. Faults are reported against the stage
/// they happened in.
#[derive(Display, IntoStaticStr, EnumIter, Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionStage {
    AwaitIdentifier,
    Capturing,
    Classifying,
    NotifyingFarmer,
    NotifyingControlUnit,
    Logging,
    Acknowledging,
    Idle,
}

/// Everything that happened to one plant that made it all the way through.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub plant_id: PlantId,
    pub classification: ClassificationResult,
    pub farmer_notified: bool,
    pub control_unit_notified: bool,
    pub record: DetectionRecord,
}

/// How a session ended when nothing unexpected went wrong.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    /// The line held no usable identifier. Nothing was done.
    Skipped,
    /// The camera let us down. Nothing was logged or acknowledged.
    CaptureFailed { plant_id: PlantId },
    /// Logged and acknowledged.
    Completed(SessionReport),
}

/// Component that walks one plant at a time through capture, diagnosis,
/// notification, logging and acknowledgement.
pub struct PlantMonitor<E, N, C, K>
where
    E: PlantSignal,
    N: SmsNotifier,
    C: ImageCapture,
    K: DiseaseClassifier,
{
    /// Unique id of the component.
    uuid: Uuid,
    config: PlantMonitorConfig,
    /// Rig controller, source of identifiers.
    embedded: E,
    modem: N,
    camera: C,
    /// Shared, read only model.
    classifier: Arc<K>,
    log: DetectionLog,
    stage: SessionStage,
}

/// Plant monitor wired to real hardware.
pub type FieldPlantMonitor = PlantMonitor<
    EmbeddedLink<SerialLink>,
    ModemLink<SerialLink>,
    CaptureService,
    ClassifierService,
>;

impl FieldPlantMonitor {
    /// Bring the station up from its config. Any failure here is fatal.
    ///
    /// * `config`: validated station config.
    pub fn from_config(config: PlantMonitorConfig) -> Result<Self> {
        config.validate()?;
        let log = DetectionLog::open(&config.image_dir, &config.detection_log)?;
        let classifier = Arc::new(ClassifierService::load(&config.classifier)?);

        let rig_port = SerialLink::open(&config.embedded)?;
        info!("Embedded controller connected on {}", rig_port.name());
        let modem_port = SerialLink::open(&config.modem.serial)?;
        info!("Modem connected on {}", modem_port.name());
        let embedded = EmbeddedLink::new(rig_port);
        let modem = ModemLink::new(modem_port, &config.modem);
        let camera = CaptureService::new(config.capture.clone());

        Ok(Self::assemble(config, log, embedded, modem, camera, classifier))
    }

    /// Build the station by reading a config file.
    ///
    /// * `filepath`: path to config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        Self::from_config(PlantMonitorConfig::from_file(filepath)?)
    }
}

impl<E, N, C, K> PlantMonitor<E, N, C, K>
where
    E: PlantSignal,
    N: SmsNotifier,
    C: ImageCapture,
    K: DiseaseClassifier,
{
    /// Generate a new component from already opened devices. The image
    /// directory and log are created if missing.
    ///
    /// * `config`: station config; only the session settings are used.
    /// * `embedded`: rig controller link.
    /// * `modem`: notifier for both recipients.
    /// * `camera`: capture device.
    /// * `classifier`: shared classifier.
    pub fn new(
        config: PlantMonitorConfig,
        embedded: E,
        modem: N,
        camera: C,
        classifier: Arc<K>,
    ) -> Result<Self> {
        let log = DetectionLog::open(&config.image_dir, &config.detection_log)?;
        Ok(Self::assemble(config, log, embedded, modem, camera, classifier))
    }

    fn assemble(
        config: PlantMonitorConfig,
        log: DetectionLog,
        embedded: E,
        modem: N,
        camera: C,
        classifier: Arc<K>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            config,
            embedded,
            modem,
            camera,
            classifier,
            log,
            stage: SessionStage::Idle,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Move to `stage`. Returns whether the stage actually changed.
    fn enter(&mut self, stage: SessionStage) -> bool {
        if self.stage == stage {
            return false;
        }
        debug!("{} -> {}", self.stage, stage);
        self.stage = stage;
        true
    }

    /// Wait one idle poll for an identifier and run its session if one
    /// arrives.
    pub fn poll_once(&mut self) -> Result<Option<SessionOutcome>> {
        self.enter(SessionStage::AwaitIdentifier);
        let timeout = Duration::from_millis(self.config.idle_poll_ms);
        match self.embedded.next_line(timeout)? {
            Some(line) => self.run_session(&line).map(Some),
            None => Ok(None),
        }
    }

    /// Take one raw line from the rig through the whole pipeline.
    ///
    /// Soft failures come back as an [`SessionOutcome`]. An `Err` means the
    /// session stopped at [`Self::stage`] and nothing after it ran, so the
    /// rig was not acknowledged.
    ///
    /// * `line`: line as received from the rig.
    pub fn run_session(&mut self, line: &str) -> Result<SessionOutcome> {
        let Some(plant_id) = PlantId::sanitise(line) else {
            warn!("Ignoring invalid plant id {line:?}");
            self.enter(SessionStage::Idle);
            return Ok(SessionOutcome::Skipped);
        };
        let session_id = Uuid::new_v4();
        info!("Plant {plant_id} ready (session {session_id})");

        self.enter(SessionStage::Capturing);
        let image_file = plant_id.image_file_name(self.config.survey_day);
        let image_path = self.config.image_dir.join(&image_file);
        if !self.camera.capture(&image_path) {
            warn!("Skipping plant {plant_id}, no image was captured");
            self.enter(SessionStage::Idle);
            return Ok(SessionOutcome::CaptureFailed { plant_id });
        }

        self.enter(SessionStage::Classifying);
        let classification = self.classifier.classify(&image_path)?;
        info!(
            "Plant {plant_id} classified as {} ({:.2}%)",
            classification.label, classification.confidence
        );
        let body = plant_id.sms_body(&classification.label);

        self.enter(SessionStage::NotifyingFarmer);
        let farmer_notified = self.modem.send_text(&self.config.farmer_number, &body);

        self.enter(SessionStage::NotifyingControlUnit);
        let control_unit_notified = self
            .modem
            .send_text(&self.config.control_unit_number, &body);

        self.enter(SessionStage::Logging);
        let record = DetectionRecord::new(plant_id.clone(), &classification, image_file);
        self.log.append(&record)?;

        self.enter(SessionStage::Acknowledging);
        self.embedded.acknowledge()?;
        info!("Plant {plant_id} done.");

        self.enter(SessionStage::Idle);
        Ok(SessionOutcome::Completed(SessionReport {
            session_id,
            plant_id,
            classification,
            farmer_notified,
            control_unit_notified,
            record,
        }))
    }
}

/// Unit struct for running the plant monitor.
pub struct PlantMonitorController;

impl PlantMonitorController {
    /// Serve plants until the stop signal is raised. Never returns early:
    /// faults are logged, followed by a backoff, and listening resumes.
    ///
    /// * `monitor`: the component to drive.
    /// * `stop_signal`: raised to end the loop at the next poll.
    pub fn start<E, N, C, K>(monitor: &mut PlantMonitor<E, N, C, K>, stop_signal: Arc<AtomicBool>)
    where
        E: PlantSignal,
        N: SmsNotifier,
        C: ImageCapture,
        K: DiseaseClassifier,
    {
        info!("Plant monitor {} waiting for plants...", monitor.uuid());
        let pause = Duration::from_millis(monitor.config.inter_session_pause_ms);
        let backoff = Duration::from_millis(monitor.config.fault_backoff_ms);

        while !stop_signal.load(Ordering::Relaxed) {
            match monitor.poll_once() {
                Ok(Some(SessionOutcome::Completed(_))) => thread::sleep(pause),
                Ok(_) => {}
                Err(e) => {
                    error!("Session fault while {}: {e}", monitor.stage());
                    thread::sleep(backoff);
                }
            }
        }
        monitor.enter(SessionStage::Idle);
        info!("Plant monitor {} stopped.", monitor.uuid());
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use serial_test::serial;
    use std::{cell::RefCell, fs::OpenOptions, rc::Rc};
    use strum::IntoEnumIterator;

    fn station_config(image_dir: impl Into<PathBuf>) -> PlantMonitorConfig {
        PlantMonitorConfig::new(
            image_dir,
            "+911234567890",
            "+919876543210",
            SerialConfig::new("/dev/ttyUSB0", 9600).with_settle_ms(2000),
            ModemConfig::new(SerialConfig::new("/dev/serial0", 115200).with_settle_ms(1000)),
            ClassifierConfig::new(
                "/home/pi/diseases_dragon_fruit.onnx",
                ["anthracnose", "cactusvirusx", "healthy", "stemcanker"],
            ),
        )
    }

    /// Rig that hands out a fixed list of lines and counts acknowledgements.
    #[derive(Default)]
    struct ListedRig {
        lines: Vec<String>,
        acks: Rc<RefCell<usize>>,
    }

    impl PlantSignal for ListedRig {
        fn next_line(&mut self, _timeout: Duration) -> Result<Option<String>> {
            Ok(if self.lines.is_empty() {
                None
            } else {
                Some(self.lines.remove(0))
            })
        }

        fn acknowledge(&mut self) -> Result<()> {
            *self.acks.borrow_mut() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Outbox(Rc<RefCell<Vec<(String, String)>>>);

    impl SmsNotifier for Outbox {
        fn send_text(&mut self, recipient: &str, body: &str) -> bool {
            self.0
                .borrow_mut()
                .push((recipient.to_string(), body.to_string()));
            true
        }
    }

    struct TouchCamera;

    impl ImageCapture for TouchCamera {
        fn capture(&self, destination: &Path) -> bool {
            std::fs::write(destination, b"jpeg").is_ok()
        }
    }

    struct AlwaysHealthy;

    impl DiseaseClassifier for AlwaysHealthy {
        fn classify(&self, _image_path: &Path) -> Result<ClassificationResult> {
            ClassificationResult::from_scores(
                vec![0.1, 0.05, 0.8, 0.05],
                &[
                    String::from("anthracnose"),
                    String::from("cactusvirusx"),
                    String::from("healthy"),
                    String::from("stemcanker"),
                ],
            )
        }
    }

    #[test]
    fn test_completed_session_walks_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let acks = Rc::new(RefCell::new(0));
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut monitor = PlantMonitor::new(
            station_config(dir.path()).with_survey_day(3),
            ListedRig {
                lines: vec![String::from("P7\r")],
                acks: acks.clone(),
            },
            Outbox(sent.clone()),
            TouchCamera,
            Arc::new(AlwaysHealthy),
        )
        .unwrap();

        let report = match monitor.poll_once().unwrap() {
            Some(SessionOutcome::Completed(report)) => report,
            other => panic!("Expected a completed session, got {other:?}"),
        };
        assert_eq!(report.plant_id.as_str(), "P7");
        assert_eq!(report.record.image_file, "plant_P7-day3.jpg");
        assert!(report.farmer_notified && report.control_unit_notified);
        assert_eq!(
            *sent.borrow(),
            vec![
                (String::from("+911234567890"), String::from("P7-healthy")),
                (String::from("+919876543210"), String::from("P7-healthy")),
            ]
        );
        assert_eq!(*acks.borrow(), 1);
        assert_eq!(monitor.stage(), SessionStage::Idle);
        assert!(dir.path().join("plant_P7-day3.jpg").is_file());
    }

    #[test]
    fn test_idle_poll_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = PlantMonitor::new(
            station_config(dir.path()),
            ListedRig::default(),
            Outbox::default(),
            TouchCamera,
            Arc::new(AlwaysHealthy),
        )
        .unwrap();
        assert_eq!(monitor.poll_once().unwrap(), None);
        assert_eq!(monitor.stage(), SessionStage::AwaitIdentifier);

        // Staying put while idle is not a transition.
        assert!(!monitor.enter(SessionStage::AwaitIdentifier));
        assert_eq!(monitor.poll_once().unwrap(), None);
        assert!(monitor.enter(SessionStage::Idle));
    }

    #[test]
    fn test_stage_names() {
        let names: Vec<&'static str> = SessionStage::iter().map(Into::into).collect();
        assert_eq!(
            names,
            vec![
                "AwaitIdentifier",
                "Capturing",
                "Classifying",
                "NotifyingFarmer",
                "NotifyingControlUnit",
                "Logging",
                "Acknowledging",
                "Idle",
            ]
        );
        assert_eq!(SessionStage::NotifyingFarmer.to_string(), "NotifyingFarmer");
    }

    #[test]
    fn test_bad_recipient_fails_validation() {
        let mut config = station_config("/home/pi/plant_images");
        assert!(config.validate().is_ok());
        config.control_unit_number = String::from("control-unit");
        assert!(matches!(
            config.validate(),
            Err(PitayaError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_huge_timings_fail_validation() {
        let mut config = station_config("/home/pi/plant_images");
        config.modem.response_timeout_ms = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(PitayaError::InvalidConfig(_))
        ));

        let mut config = station_config("/home/pi/plant_images");
        config.capture.timeout_ms = MAX_WAIT_MS + 1;
        assert!(config.validate().is_err());

        let mut config = station_config("/home/pi/plant_images");
        config.embedded.read_timeout_ms = MAX_WAIT_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(matches!(
            PlantMonitorConfig::from_file("/nonexistent/plant_monitor.yaml"),
            Err(PitayaError::ConfigMissing(_))
        ));
    }

    #[test]
    fn test_read_shipped_config() {
        let config = PlantMonitorConfig::from_file(crate::test_file_path!(
            "/config/components/field_station/plant_monitor.yaml"
        ))
        .unwrap();
        assert_eq!(config, station_config("/home/pi/plant_images"));
    }

    #[test]
    #[serial]
    fn test_write_component_config_to_file() {
        let config = station_config("/home/pi/plant_images");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(Path::new(&format!(
                "{}/config/components/field_station/plant_monitor_generated.yaml",
                env!("CARGO_MANIFEST_DIR")
            )))
            .expect("Failed to open file");
        serde_yaml::to_writer(file, &config).expect("Failed to write yaml");
    }

    #[test]
    #[serial]
    fn test_read_component_config_to_file() {
        let write_config = station_config("/home/pi/plant_images")
            .with_survey_day(2)
            .with_loop_timings(50, 500, 2000);
        let path = format!(
            "{}/config/components/field_station/plant_monitor_generated.yaml",
            env!("CARGO_MANIFEST_DIR")
        );
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(Path::new(&path))
            .expect("Failed to open file");
        serde_yaml::to_writer(file, &write_config).expect("Failed to write yaml");

        let read_config = PlantMonitorConfig::from_file(&path).unwrap();
        assert_eq!(write_config, read_config, "Failed to read write station config");
    }

    #[cfg_attr(not(feature = "hardware_test"), ignore)]
    #[test]
    /// Needs the rig controller, the modem, the camera and the model on a Pi.
    fn test_field_station_starts() {
        let monitor = FieldPlantMonitor::from_config_file(crate::test_file_path!(
            "/config/components/field_station/plant_monitor.yaml"
        ));
        assert!(monitor.is_ok());
    }
}
