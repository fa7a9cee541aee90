//! Discrete tomography of 2D slices with TVR-DART.
//!
//! A parallel-beam sinogram is first reconstructed with SIRT. The SIRT image
//! then seeds a joint estimate of the material gray values and the sharpness
//! of a soft segmentation function, after which the final segmented
//! reconstruction is computed with those parameters. See [`pipeline`] for
//! the full sequence.

pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod lbfgs;
pub mod phantom;
pub mod pipeline;
pub mod projector;
pub mod segmentation;
pub mod sirt;
pub mod tv;
pub mod tvrdart;

pub use config::ReconConfig;
pub use error::{ReconError, Result};
pub use geometry::{limited_angles, ProjectionGeometry, VolumeGeometry};
pub use pipeline::{reconstruct, run, ReconReport, ReconSummary};
pub use projector::SystemMatrix;
pub use segmentation::{gv2param, param2gv, SoftSegmentation};
pub use sirt::{sirt, SirtOptions};
pub use tvrdart::TvrDartOptions;
