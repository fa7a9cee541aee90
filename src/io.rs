//! Reading and writing arrays: `.npy` for data, PNG for quick-look previews.

use std::path::Path;

use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};
use ndarray_npy::{read_npy, write_npy};
use tracing::warn;

use crate::error::{ReconError, Result};

/// Load a 2D sinogram stored as `f32` or `f64` `.npy`.
pub fn load_sinogram(path: &Path) -> Result<Array2<f32>> {
    let sinogram = match read_npy::<_, Array2<f32>>(path) {
        Ok(data) => data,
        Err(single) => match read_npy::<_, Array2<f64>>(path) {
            Ok(data) => data.mapv(|v| v as f32),
            // Report the first failure; it is the one for the native element type
            Err(_) => return Err(ReconError::ReadNpy { path: path.to_path_buf(), source: single }),
        },
    };

    let non_finite = sinogram.iter().filter(|v| !v.is_finite()).count();
    if non_finite > 0 {
        warn!(non_finite, path = %path.display(), "sinogram contains non-finite samples");
    }
    Ok(sinogram)
}

pub fn save_image(path: &Path, image: &Array2<f32>) -> Result<()> {
    write_npy(path, image).map_err(|source| ReconError::WriteNpy {
        path: path.to_path_buf(),
        source,
    })
}

/// Subtract the intensity offset from every sample.
pub fn correct_offset(sinogram: &mut Array2<f32>, offset: f32) {
    sinogram.mapv_inplace(|v| v - offset);
}

/// Map the image onto 8-bit gray levels, darkest value to 0 and brightest to 255.
pub fn to_grayscale(image: ArrayView2<f32>) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
    let (rows, cols) = image.dim();
    let (lo, hi) = image
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = if hi > lo { hi - lo } else { 1.0 };

    let pixels = image
        .iter()
        .map(|&v| {
            if v.is_finite() {
                ((v - lo) / range * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect();
    ImageBuffer::from_raw(cols as u32, rows as u32, pixels)
}

/// Write a grayscale PNG preview of the image.
pub fn save_preview(path: &Path, image: ArrayView2<f32>) -> Result<()> {
    let buffer = to_grayscale(image).ok_or_else(|| {
        ReconError::InvalidParameter(format!("cannot render {:?} image", image.dim()))
    })?;
    buffer
        .save(path)
        .map_err(|source| ReconError::Preview { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn f64_sinograms_are_converted() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sino.npy");
        let data = array![[1.0f64, 2.5], [-0.5, 4.0]];
        write_npy(&path, &data).unwrap();

        let loaded = load_sinogram(&path)?;
        assert_eq!(loaded, array![[1.0f32, 2.5], [-0.5, 4.0]]);
        Ok(())
    }

    #[test]
    fn saved_images_load_back() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.npy");
        let image = array![[0.0f32, 1.0, 2.0], [3.0, 4.0, 5.0]];
        save_image(&path, &image)?;
        assert_eq!(load_sinogram(&path)?, image);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_sinogram(&dir.path().join("missing.npy")).unwrap_err();
        assert!(matches!(err, ReconError::ReadNpy { .. }));
    }

    #[test]
    fn offset_is_subtracted() {
        let mut sino = array![[0.0f32, 1.0]];
        correct_offset(&mut sino, -0.5);
        assert_eq!(sino, array![[0.5, 1.5]]);
    }

    #[test]
    fn grayscale_spans_full_range() {
        let image = array![[-1.0f32, 0.0], [1.0, f32::NAN]];
        let gray = to_grayscale(image.view()).unwrap();
        assert_eq!(gray.dimensions(), (2, 2));
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 128);
        assert_eq!(gray.get_pixel(0, 1)[0], 255);
        assert_eq!(gray.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn preview_is_written() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.png");
        save_preview(&path, array![[0.0f32, 1.0], [2.0, 3.0]].view())?;
        assert!(path.exists());
        Ok(())
    }
}
