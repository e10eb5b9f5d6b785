//! Compute capability resolution
//!
//! Separation runs on the best device available: a discrete GPU when one
//! is present, the Apple GPU class on macOS, else plain CPU. The fallback
//! chain is a declarative ordered probe list so a new capability tier is
//! one more entry, not a change to worker logic.

use std::process::Command;

/// Compute device handed to the separation collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    /// NVIDIA discrete accelerator
    Cuda,
    /// Apple Silicon GPU
    Mps,
    /// Software baseline
    Cpu,
}

impl ComputeDevice {
    /// Device flag as the separation CLI expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Mps => "mps",
            ComputeDevice::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the fallback chain
pub struct CapabilityProbe {
    pub device: ComputeDevice,
    pub available: fn() -> bool,
}

/// Probe order: first available wins. CPU terminates the chain.
pub const PROBE_ORDER: &[CapabilityProbe] = &[
    CapabilityProbe {
        device: ComputeDevice::Cuda,
        available: cuda_available,
    },
    CapabilityProbe {
        device: ComputeDevice::Mps,
        available: mps_available,
    },
    CapabilityProbe {
        device: ComputeDevice::Cpu,
        available: always_available,
    },
];

/// Resolve the compute device for this worker process.
pub fn resolve_device() -> ComputeDevice {
    for probe in PROBE_ORDER {
        if (probe.available)() {
            tracing::info!(device = %probe.device, "Compute capability resolved");
            return probe.device;
        }
    }
    // The CPU probe always succeeds; this is only reachable if the
    // probe table loses its terminal entry.
    ComputeDevice::Cpu
}

fn cuda_available() -> bool {
    Command::new("nvidia-smi")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn mps_available() -> bool {
    cfg!(target_os = "macos")
}

fn always_available() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_chain_terminates_with_cpu() {
        let last = PROBE_ORDER.last().unwrap();
        assert_eq!(last.device, ComputeDevice::Cpu);
        assert!((last.available)());
    }

    #[test]
    fn resolution_always_yields_a_device() {
        // Whatever the host offers, the chain must resolve.
        let device = resolve_device();
        assert!(matches!(
            device,
            ComputeDevice::Cuda | ComputeDevice::Mps | ComputeDevice::Cpu
        ));
    }

    #[test]
    fn device_flags_match_the_cli_contract() {
        assert_eq!(ComputeDevice::Cuda.as_str(), "cuda");
        assert_eq!(ComputeDevice::Mps.as_str(), "mps");
        assert_eq!(ComputeDevice::Cpu.as_str(), "cpu");
    }
}
