//! Device selection and accelerator reporting.

use std::fmt;

use candle_core::Device;
use tracing::{info, warn};

/// Picks the inference device: CUDA, then Metal, then CPU.
///
/// Initialization failures fall back to the CPU rather than aborting startup.
pub fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        info!("CPU forced by configuration");
        return Device::Cpu;
    }

    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("using CUDA device 0");
                return device;
            }
            Err(e) => warn!(error = %e, "CUDA initialization failed"),
        }
    }

    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("using Metal device 0");
                return device;
            }
            Err(e) => warn!(error = %e, "Metal initialization failed"),
        }
    }

    info!("using CPU for inference");
    Device::Cpu
}

/// The hardware a model runs on, as reported by `/info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Cuda(usize),
    Metal(usize),
    None,
}

impl Accelerator {
    /// Inspects `device`; anything that is not a GPU reports as [`Accelerator::None`].
    pub fn probe(device: &Device) -> Self {
        match device.location() {
            candle_core::DeviceLocation::Cuda { gpu_id } => Self::Cuda(gpu_id),
            candle_core::DeviceLocation::Metal { gpu_id } => Self::Metal(gpu_id),
            candle_core::DeviceLocation::Cpu => Self::None,
        }
    }

    pub fn is_available(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cuda(id) => write!(f, "cuda:{id}"),
            Self::Metal(id) => write!(f, "metal:{id}"),
            Self::None => f.write_str("none"),
        }
    }
}
