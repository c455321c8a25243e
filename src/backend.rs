//! Compute backend selection
//!
//! Training runs on `Autodiff<DefaultBackend>`; evaluation drops to the inner
//! backend through `AutodiffModule::valid`. The CPU backend is always
//! available, the CUDA backend needs the `cuda` feature.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray;

/// Backend the fold loop trains on
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device shared by every fold of a run
pub type Device = <DefaultBackend as Backend>::Device;

pub fn default_device() -> Device {
    Device::default()
}

/// Short backend label for console output
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}

/// Backend label together with the selected device
pub fn device_summary(device: &Device) -> String {
    format!("{} on {:?}", backend_name(), device)
}
