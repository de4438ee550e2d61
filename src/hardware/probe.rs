//! Host measurement
//!
//! Measurements are best-effort and untrusted: every field is optional and a
//! missing value pushes the profile to the most conservative tier.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Raw quantities reported by a probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareMeasurement {
    pub memory_gb: Option<f64>,
    pub cpu_cores: Option<usize>,
    pub accelerator_present: Option<bool>,
}

/// Source of hardware measurements
pub trait HardwareProbe: Send + Sync {
    fn measure(&self) -> HardwareMeasurement;
}

/// Reads the running Linux host
pub struct SystemProbe {
    meminfo: PathBuf,
    accelerator_nodes: Vec<PathBuf>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            meminfo: PathBuf::from("/proc/meminfo"),
            // NVIDIA and AMD (ROCm) device nodes
            accelerator_nodes: vec![PathBuf::from("/dev/nvidia0"), PathBuf::from("/dev/kfd")],
        }
    }

    fn memory_gb(&self) -> Option<f64> {
        let text = match std::fs::read_to_string(&self.meminfo) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %self.meminfo.display(), error = %e, "memory measurement failed");
                return None;
            }
        };
        parse_mem_total_gb(&text)
    }

    fn cpu_cores(&self) -> Option<usize> {
        match std::thread::available_parallelism() {
            Ok(n) => Some(n.get()),
            Err(e) => {
                tracing::warn!(error = %e, "cpu measurement failed");
                None
            }
        }
    }

    fn accelerator_present(&self) -> Option<bool> {
        let mut any_readable = false;
        for node in &self.accelerator_nodes {
            match node.try_exists() {
                Ok(true) => return Some(true),
                Ok(false) => any_readable = true,
                Err(e) => {
                    tracing::debug!(path = %node.display(), error = %e, "accelerator node unreadable");
                }
            }
        }
        any_readable.then_some(false)
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareProbe for SystemProbe {
    fn measure(&self) -> HardwareMeasurement {
        HardwareMeasurement {
            memory_gb: self.memory_gb(),
            cpu_cores: self.cpu_cores(),
            accelerator_present: self.accelerator_present(),
        }
    }
}

/// `MemTotal:  16318712 kB` → 15.56
fn parse_mem_total_gb(meminfo: &str) -> Option<f64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / (1024.0 * 1024.0))
}

/// Returns a fixed measurement. For tests and for hosts where the caller
/// already knows the hardware.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub HardwareMeasurement);

impl FixedProbe {
    pub fn new(memory_gb: f64, cpu_cores: usize, accelerator_present: bool) -> Self {
        Self(HardwareMeasurement {
            memory_gb: Some(memory_gb),
            cpu_cores: Some(cpu_cores),
            accelerator_present: Some(accelerator_present),
        })
    }
}

impl HardwareProbe for FixedProbe {
    fn measure(&self) -> HardwareMeasurement {
        self.0
    }
}
