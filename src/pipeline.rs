//! The complete reconstruction: offset correction, SIRT initialisation,
//! parameter estimation, final TVR-DART reconstruction and output.

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::Serialize;
use tracing::info;

use crate::config::ReconConfig;
use crate::error::{ReconError, Result};
use crate::geometry::{limited_angles, ProjectionGeometry, VolumeGeometry};
use crate::io::{correct_offset, load_sinogram, save_image, save_preview};
use crate::projector::SystemMatrix;
use crate::segmentation::{gv2param, param2gv, SoftSegmentation};
use crate::sirt::{sirt, SirtOptions};
use crate::tvrdart;

/// Everything a run produces, in the units of the input data.
#[derive(Debug, Clone)]
pub struct ReconReport {
    pub summary: ReconSummary,
    pub sirt: Array2<f32>,
    pub segmented: Array2<f32>,
    /// Final continuous image snapped onto the nearest estimated gray value
    pub hard: Array2<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconSummary {
    pub n_angles: usize,
    pub n_detectors: usize,
    pub offset: f32,
    /// Maximum of the SIRT reconstruction, used to normalise the data
    pub scale_factor: f32,
    pub gray_values: Vec<f32>,
    pub sharpness: Vec<f32>,
}

/// Reconstruct an offset-uncorrected sinogram of shape `(angles, detectors)`.
pub fn reconstruct(config: &ReconConfig, mut sinogram: Array2<f32>) -> Result<ReconReport> {
    config.validate()?;
    let (n_angles, n_detectors) = sinogram.dim();

    info!(offset = config.offset, "Intensity-offset correction");
    correct_offset(&mut sinogram, config.offset);

    info!(n_angles, n_detectors, "Configure projection and volume geometry");
    let angles = limited_angles(n_angles, config.first_angle_deg, config.last_angle_deg);
    let proj = ProjectionGeometry::parallel(config.det_spacing, n_detectors, angles)?;
    let vol = VolumeGeometry::new(n_detectors, n_detectors)?;
    let w = SystemMatrix::build(&proj, &vol);

    info!(iterations = config.sirt_iterations, "Initial reconstruction");
    let mut recsirt = sirt(
        &w,
        sinogram.view(),
        config.sirt_iterations,
        &SirtOptions::default(),
    )?;
    let scale_factor = recsirt.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    if !(scale_factor > 0.0 && scale_factor.is_finite()) {
        return Err(ReconError::InvalidParameter(format!(
            "SIRT reconstruction has no positive maximum ({scale_factor}); cannot normalise"
        )));
    }
    sinogram /= scale_factor;
    recsirt /= scale_factor;

    info!(lambda = config.lambda, "Parameter estimation");
    let options = config.tvrdart_options();
    let gv0 = Array1::linspace(0.0, 1.0, config.n_gray_values);
    let k0 = Array1::from_elem(config.n_gray_values - 1, config.sharpness);
    let param0 = gv2param(gv0.view(), k0.view())?;
    let (_, param) = tvrdart::joint(
        &w,
        sinogram.view(),
        recsirt.view(),
        param0.view(),
        config.lambda,
        &options,
    )?;
    let (gray_values, sharpness) = param2gv(param.view())?;

    info!(iterations = config.iterations, "Reconstruction with estimated parameters");
    let (mut segmented, rec) = tvrdart::recon(
        &w,
        sinogram.view(),
        recsirt.view(),
        param.view(),
        config.lambda,
        config.iterations,
        &options,
    )?;

    let segmentation = SoftSegmentation::from_param(param.view())?;
    let mut hard = rec.mapv(|v| segmentation.hard(v));

    let gray_values = (gray_values * scale_factor).to_vec();
    recsirt *= scale_factor;
    segmented *= scale_factor;
    hard *= scale_factor;
    info!(
        ?gray_values,
        sharpness = ?sharpness.as_slice(),
        scale_factor,
        "Reconstruction finished"
    );

    Ok(ReconReport {
        summary: ReconSummary {
            n_angles,
            n_detectors,
            offset: config.offset,
            scale_factor,
            gray_values,
            sharpness: sharpness.to_vec(),
        },
        sirt: recsirt,
        segmented,
        hard,
    })
}

/// Write the segmented image, and the hard segmentation, previews and
/// summary when configured.
pub fn write_outputs(config: &ReconConfig, report: &ReconReport) -> Result<()> {
    if let Some(dir) = &config.preview_dir {
        fs::create_dir_all(dir).map_err(|source| ReconError::Io { path: dir.clone(), source })?;
        save_preview(&dir.join("sirt.png"), report.sirt.view())?;
        save_preview(&dir.join("tvrdart.png"), report.segmented.view())?;
        save_preview(&dir.join("hard.png"), report.hard.view())?;
        info!(dir = %dir.display(), "Previews written");
    }

    if let Some(path) = &config.hard_output {
        info!(output = %path.display(), "Saving hard segmentation");
        save_image(path, &report.hard)?;
    }

    if let Some(path) = &config.summary {
        let json = serde_json::to_string_pretty(&report.summary)
            .map_err(|source| ReconError::Json { path: path.clone(), source })?;
        fs::write(path, json).map_err(|source| ReconError::Io { path: path.clone(), source })?;
    }

    info!(output = %config.output.display(), "Saving results");
    save_image(&config.output, &report.segmented)
}

/// Load the sinogram at `input`, reconstruct it and write all outputs.
pub fn run(config: &ReconConfig, input: &Path) -> Result<ReconReport> {
    info!(input = %input.display(), "Reading data");
    let sinogram = load_sinogram(input)?;
    let report = reconstruct(config, sinogram)?;
    write_outputs(config, &report)?;
    Ok(report)
}
