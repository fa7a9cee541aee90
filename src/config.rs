//! Reconstruction settings, optionally read from a JSON file.
//!
//! Every field has a default matching the nanotube example, so an empty
//! object `{}` is a complete configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};
use crate::tvrdart::TvrDartOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconConfig {
    /// Subtracted from every sinogram sample before reconstruction
    pub offset: f32,
    pub det_spacing: f32,
    pub first_angle_deg: f32,
    pub last_angle_deg: f32,

    pub sirt_iterations: usize,

    /// Number of materials in the specimen, vacuum included
    pub n_gray_values: usize,
    /// Initial sharpness of every soft segmentation transition
    pub sharpness: f32,
    /// TV weight
    pub lambda: f32,
    /// L-BFGS iterations of the final reconstruction
    pub iterations: usize,

    pub joint_rounds: usize,
    pub joint_x_iterations: usize,
    pub joint_param_iterations: usize,
    pub huber_delta: f32,
    pub min_sharpness: f32,
    pub fix_background: bool,

    pub output: PathBuf,
    /// Where to write the reconstruction snapped onto the estimated gray values
    pub hard_output: Option<PathBuf>,
    pub preview_dir: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        let tvrdart = TvrDartOptions::default();
        Self {
            offset: -0.00893,
            det_spacing: 1.0,
            first_angle_deg: -50.0,
            last_angle_deg: 50.0,
            sirt_iterations: 50,
            n_gray_values: 2,
            sharpness: 4.0,
            lambda: 10.0,
            iterations: 50,
            joint_rounds: tvrdart.joint_rounds,
            joint_x_iterations: tvrdart.x_iterations,
            joint_param_iterations: tvrdart.param_iterations,
            huber_delta: tvrdart.huber_delta,
            min_sharpness: tvrdart.min_sharpness,
            fix_background: tvrdart.fix_background,
            output: PathBuf::from("TVRDART2Dreconstruction.npy"),
            hard_output: None,
            preview_dir: None,
            summary: None,
        }
    }
}

fn invalid(message: String) -> ReconError {
    ReconError::InvalidParameter(message)
}

impl ReconConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|source| ReconError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|source| ReconError::Json { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_gray_values < 2 {
            return Err(invalid(format!(
                "need at least 2 gray values, got {}",
                self.n_gray_values
            )));
        }
        if !(self.first_angle_deg < self.last_angle_deg) {
            return Err(invalid(format!(
                "angle range [{}, {}] is empty",
                self.first_angle_deg, self.last_angle_deg
            )));
        }
        if !(self.det_spacing > 0.0) {
            return Err(invalid(format!(
                "detector spacing must be positive, got {}",
                self.det_spacing
            )));
        }
        let iteration_counts = [
            ("sirt_iterations", self.sirt_iterations),
            ("iterations", self.iterations),
            ("joint_rounds", self.joint_rounds),
            ("joint_x_iterations", self.joint_x_iterations),
            ("joint_param_iterations", self.joint_param_iterations),
        ];
        if let Some((name, _)) = iteration_counts.iter().find(|(_, count)| *count == 0) {
            return Err(invalid(format!("{name} must be positive")));
        }
        if !(self.sharpness > 0.0 && self.min_sharpness > 0.0 && self.huber_delta > 0.0) {
            return Err(invalid(format!(
                "sharpness ({}), minimum sharpness ({}) and Huber delta ({}) must be positive",
                self.sharpness, self.min_sharpness, self.huber_delta
            )));
        }
        if !(self.lambda >= 0.0) {
            return Err(invalid(format!("lambda must be non-negative, got {}", self.lambda)));
        }
        Ok(())
    }

    pub fn tvrdart_options(&self) -> TvrDartOptions {
        TvrDartOptions {
            huber_delta: self.huber_delta,
            joint_rounds: self.joint_rounds,
            x_iterations: self.joint_x_iterations,
            param_iterations: self.joint_param_iterations,
            min_sharpness: self.min_sharpness,
            fix_background: self.fix_background,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_object_gives_defaults() {
        let file = write_config("{}");
        let config = ReconConfig::from_file(file.path()).unwrap();
        assert_eq!(config, ReconConfig::default());
        assert_eq!(config.output, PathBuf::from("TVRDART2Dreconstruction.npy"));
    }

    #[test]
    fn fields_override_defaults() {
        let file =
            write_config(r#"{ "lambda": 2.5, "n_gray_values": 3, "preview_dir": "plots" }"#);
        let config = ReconConfig::from_file(file.path()).unwrap();
        assert_eq!(config.lambda, 2.5);
        assert_eq!(config.n_gray_values, 3);
        assert_eq!(config.preview_dir, Some(PathBuf::from("plots")));
        assert_eq!(config.sirt_iterations, 50);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = write_config(r#"{ "lamda": 2.5 }"#);
        assert!(matches!(
            ReconConfig::from_file(file.path()),
            Err(ReconError::Json { .. })
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for text in [
            r#"{ "n_gray_values": 1 }"#,
            r#"{ "first_angle_deg": 10, "last_angle_deg": -10 }"#,
            r#"{ "sharpness": 0 }"#,
            r#"{ "iterations": 0 }"#,
            r#"{ "sirt_iterations": 0 }"#,
            r#"{ "joint_rounds": 0 }"#,
            r#"{ "joint_x_iterations": 0 }"#,
            r#"{ "joint_param_iterations": 0 }"#,
            r#"{ "lambda": -1 }"#,
        ] {
            let file = write_config(text);
            assert!(
                matches!(
                    ReconConfig::from_file(file.path()),
                    Err(ReconError::InvalidParameter(_))
                ),
                "{text} should be rejected"
            );
        }
    }
}
