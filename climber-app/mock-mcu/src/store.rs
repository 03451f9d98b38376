//! Calibration store backed by a JSON file, standing in for on-chip preferences.

use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
};

use climber_core::utils::controllers::CalibrationStore;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

/// Flat `namespace/key -> value` map, rewritten on every store.
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, f32>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let values = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn flush(&self) -> Result<(), StoreError> {
        fs::write(&self.path, serde_json::to_string_pretty(&self.values)?)?;
        Ok(())
    }
}

impl CalibrationStore for JsonFileStore {
    type Error = StoreError;

    fn load(
        &mut self,
        namespace: &str,
        key: &str,
    ) -> Option<f32> {
        self.values.get(&format!("{namespace}/{key}")).copied()
    }

    fn store(
        &mut self,
        namespace: &str,
        key: &str,
        value: f32,
    ) -> Result<(), Self::Error> {
        self.values.insert(format!("{namespace}/{key}"), value);
        self.flush()
    }
}
