use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::optimizer::Adam;
use crate::parameters::ParameterSet;
use crate::GlucoseError;

/// Training state persisted after every improving validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub parameters: ParameterSet,
    pub optimizer: Adam,
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    /// `None` until a validation pass has completed
    pub best_val_loss: Option<f64>,
}

impl Checkpoint {
    /// Path of the best checkpoint of `model_name` inside `dir`
    pub fn best_path(dir: impl AsRef<Path>, model_name: &str) -> PathBuf {
        dir.as_ref().join(format!("{model_name}_best.json"))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GlucoseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Read a checkpoint. A missing file is reported as
    /// [`GlucoseError::CheckpointNotFound`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GlucoseError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(GlucoseError::CheckpointNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("glucofit-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_save_and_load() {
        let dir = scratch_dir("checkpoint");
        let mut parameters = ParameterSet::default();
        parameters.raw_mut().beta1 = 0.0137;
        parameters.set_medication_theta("metformin", -0.25);
        let checkpoint = Checkpoint {
            epoch: 7,
            optimizer: Adam::new(parameters.len(), 1e-5),
            parameters,
            train_losses: vec![120.5, 98.25],
            val_losses: vec![130.0],
            best_val_loss: Some(130.0),
        };

        let path = Checkpoint::best_path(&dir, "unit");
        assert!(path.ends_with("unit_best.json"));
        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();

        assert_eq!(loaded.epoch, 7);
        assert_eq!(loaded.best_val_loss, Some(130.0));
        assert_eq!(loaded.parameters.names(), checkpoint.parameters.names());
        for (a, b) in loaded.parameters.to_vec().iter().zip(checkpoint.parameters.to_vec()) {
            assert_relative_eq!(*a, b, epsilon = 1e-12);
        }
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_file_is_reported() {
        let path = std::env::temp_dir().join("glucofit-does-not-exist_best.json");
        assert!(matches!(
            Checkpoint::load(&path),
            Err(GlucoseError::CheckpointNotFound(p)) if p == path
        ));
    }
}
