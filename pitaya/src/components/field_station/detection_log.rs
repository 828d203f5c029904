use crate::{messages::records::detection::DetectionRecord, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::{create_dir_all, OpenOptions},
    path::{Path, PathBuf},
};

/// Header row written once when the log is created.
pub const HEADER: [&str; 5] = ["Timestamp", "PlantID", "Label", "Confidence", "ImageFile"];

fn default_file_name() -> String {
    String::from("plant_log.csv")
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DetectionLogConfig {
    /// File name of the log inside the image directory.
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

impl Default for DetectionLogConfig {
    fn default() -> Self {
        Self {
            file_name: default_file_name(),
        }
    }
}

/// Append only CSV record of every classified plant. Survives restarts:
/// an existing log is extended, never rewritten.
#[derive(Debug)]
pub struct DetectionLog {
    path: PathBuf,
}

impl DetectionLog {
    /// Open the log in `dir`, creating the directory and a header only log
    /// if either is missing.
    ///
    /// * `dir`: directory the log lives in, shared with the captures.
    /// * `config`: log file name.
    pub fn open(dir: &Path, config: &DetectionLogConfig) -> Result<Self> {
        create_dir_all(dir)?;
        let path = dir.join(&config.file_name);
        if !path.exists() {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(HEADER)?;
            writer.flush()?;
            info!("Created detection log {:?}", path);
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it to disk before returning.
    ///
    /// * `record`: the detection to log.
    pub fn append(&self, record: &DetectionRecord) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(record.to_row())?;
        writer.flush()?;
        Ok(())
    }
}
