//! Backend selection
//!
//! The serving backend is chosen at compile time: CUDA when built with the
//! `cuda` feature, WGPU with `wgpu`, otherwise the NdArray CPU backend.
//! None of them is wrapped in `Autodiff`, so every forward pass runs without
//! gradient tracking, dropout is the identity and batch norm uses its
//! running statistics.

use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type InferenceBackend = burn_cuda::Cuda;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type InferenceBackend = burn::backend::Wgpu;

#[cfg(not(any(feature = "cuda", feature = "wgpu")))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

/// Device used by the serving backend
pub type InferenceDevice = <InferenceBackend as Backend>::Device;

/// Get the default device for the current backend
pub fn default_device() -> InferenceDevice {
    InferenceDevice::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(feature = "wgpu", not(feature = "cuda")))]
    {
        "WGPU (GPU)"
    }

    #[cfg(not(any(feature = "cuda", feature = "wgpu")))]
    {
        "NdArray (CPU)"
    }
}

/// Whether an accelerator backend was compiled in
pub fn has_accelerator() -> bool {
    cfg!(any(feature = "cuda", feature = "wgpu"))
}
