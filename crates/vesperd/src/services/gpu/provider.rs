//! Hardware telemetry providers.
//!
//! The production provider shells out to nvidia-smi once per tick and
//! resolves process names through sysinfo. When no NVIDIA tooling is
//! present the daemon falls back to a mock provider so the dashboard
//! stays functional on GPU-less machines.

use std::process::Command;
use std::str::FromStr;
use std::sync::Mutex;

use rand::Rng;
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

use vesper_common::gpu::{epoch_seconds, GpuProcess, GpuSnapshot};
use vesper_common::ServiceError;

/// One telemetry sample per call. Implementations are synchronous; a
/// sample is a couple of process spawns at most.
pub trait GpuStatsProvider: Send + Sync + 'static {
    fn sample(&self) -> Result<GpuSnapshot, ServiceError>;
    fn name(&self) -> String;
}

const QUERY_GPU: &str = "--query-gpu=name,index,memory.total,memory.used,memory.free,\
utilization.gpu,utilization.memory,temperature.gpu,power.draw,power.limit,\
clocks.gr,clocks.mem,clocks.sm";

const QUERY_APPS: &str = "--query-compute-apps=pid,used_memory";

pub struct NvidiaSmiProvider {
    system: Mutex<System>,
}

impl NvidiaSmiProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// One probe query; used by auto provider selection.
    pub fn detect() -> bool {
        Command::new("nvidia-smi")
            .args([QUERY_GPU, "--format=csv,noheader,nounits"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn query_processes(&self) -> Vec<GpuProcess> {
        let output = match Command::new("nvidia-smi")
            .args([QUERY_APPS, "--format=csv,noheader,nounits"])
            .output()
        {
            Ok(output) if output.status.success() => output,
            _ => {
                debug!("Could not query GPU process list");
                return Vec::new();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut system = self.system.lock().unwrap();
        system.refresh_processes();

        let mut processes = Vec::new();
        for line in stdout.lines() {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 2 {
                continue;
            }
            let Ok(pid) = parts[0].parse::<u32>() else {
                continue;
            };
            let vram_mb = parts[1].parse::<u64>().unwrap_or(0);
            let name = system
                .process(Pid::from_u32(pid))
                .map(|p| p.name().to_string())
                .unwrap_or_else(|| format!("pid_{}", pid));
            processes.push(GpuProcess {
                pid,
                name,
                vram_mb,
                kind: "compute".to_string(),
            });
        }
        processes
    }
}

impl Default for NvidiaSmiProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn field<T: FromStr>(parts: &[&str], index: usize, name: &str) -> Result<T, ServiceError> {
    parts
        .get(index)
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| ServiceError::backend(format!("bad nvidia-smi field '{}'", name)))
}

/// Power and clock fields report "[N/A]" on some boards.
fn field_or_zero<T: FromStr + Default>(parts: &[&str], index: usize) -> T {
    parts
        .get(index)
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or_default()
}

impl GpuStatsProvider for NvidiaSmiProvider {
    fn sample(&self) -> Result<GpuSnapshot, ServiceError> {
        let output = Command::new("nvidia-smi")
            .args([QUERY_GPU, "--format=csv,noheader,nounits"])
            .output()
            .map_err(|e| ServiceError::backend(format!("nvidia-smi failed to run: {}", e)))?;

        if !output.status.success() {
            return Err(ServiceError::backend(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| ServiceError::backend("nvidia-smi reported no devices"))?;
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 13 {
            return Err(ServiceError::backend("truncated nvidia-smi output"));
        }

        let vram_total: u64 = field(&parts, 2, "memory.total")?;
        let vram_used: u64 = field(&parts, 3, "memory.used")?;
        let vram_free: u64 = field(&parts, 4, "memory.free")?;
        let vram_percent = if vram_total > 0 {
            ((vram_used as f64 / vram_total as f64) * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(GpuSnapshot {
            timestamp: epoch_seconds(),
            name: parts[0].to_string(),
            gpu_id: field(&parts, 1, "index")?,
            vram_total,
            vram_used,
            vram_free,
            vram_percent,
            gpu_utilization: field(&parts, 5, "utilization.gpu")?,
            memory_utilization: field(&parts, 6, "utilization.memory")?,
            temperature: field(&parts, 7, "temperature.gpu")?,
            power_draw: field_or_zero(&parts, 8),
            power_limit: field_or_zero(&parts, 9),
            graphics_clock: field_or_zero(&parts, 10),
            memory_clock: field_or_zero(&parts, 11),
            sm_clock: field_or_zero(&parts, 12),
            processes: self.query_processes(),
        })
    }

    fn name(&self) -> String {
        "nvidia-smi".to_string()
    }
}

/// Plausible fixed stats with light jitter, for hosts without a GPU.
pub struct MockGpuProvider;

impl GpuStatsProvider for MockGpuProvider {
    fn sample(&self) -> Result<GpuSnapshot, ServiceError> {
        let mut rng = rand::thread_rng();
        let vram_total = 11_264u64;
        let vram_used = 6_144u64;

        Ok(GpuSnapshot {
            timestamp: epoch_seconds(),
            name: "Mock GPU (no NVML device)".to_string(),
            gpu_id: 0,
            vram_total,
            vram_used,
            vram_free: vram_total - vram_used,
            vram_percent: 54.5,
            gpu_utilization: rng.gen_range(55..85),
            memory_utilization: rng.gen_range(40..70),
            temperature: rng.gen_range(68..76),
            power_draw: 185.5,
            power_limit: 250.0,
            graphics_clock: 1607,
            memory_clock: 5005,
            sm_clock: 1607,
            processes: vec![
                GpuProcess {
                    pid: 1234,
                    name: "ollama".to_string(),
                    vram_mb: 5120,
                    kind: "compute".to_string(),
                },
                GpuProcess {
                    pid: 5678,
                    name: "python3".to_string(),
                    vram_mb: 512,
                    kind: "compute".to_string(),
                },
            ],
        })
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

/// Concrete provider chosen at startup.
pub enum SystemProvider {
    NvidiaSmi(NvidiaSmiProvider),
    Mock(MockGpuProvider),
}

impl GpuStatsProvider for SystemProvider {
    fn sample(&self) -> Result<GpuSnapshot, ServiceError> {
        match self {
            Self::NvidiaSmi(p) => p.sample(),
            Self::Mock(p) => p.sample(),
        }
    }

    fn name(&self) -> String {
        match self {
            Self::NvidiaSmi(p) => p.name(),
            Self::Mock(p) => p.name(),
        }
    }
}

/// Resolve the configured provider kind ("auto", "nvidia-smi", "mock").
pub fn select_provider(kind: &str) -> SystemProvider {
    match kind {
        "mock" => SystemProvider::Mock(MockGpuProvider),
        "nvidia-smi" => SystemProvider::NvidiaSmi(NvidiaSmiProvider::new()),
        _ => {
            if NvidiaSmiProvider::detect() {
                info!("GPU telemetry via nvidia-smi");
                SystemProvider::NvidiaSmi(NvidiaSmiProvider::new())
            } else {
                warn!("nvidia-smi not available; GPU monitor running in mock mode");
                SystemProvider::Mock(MockGpuProvider)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_reports_consistent_vram() {
        let snapshot = MockGpuProvider.sample().unwrap();
        assert_eq!(snapshot.vram_total, snapshot.vram_used + snapshot.vram_free);
        assert!(snapshot.vram_percent > 0.0);
        assert_eq!(snapshot.processes.len(), 2);
    }

    #[test]
    fn field_parsing_flags_garbage() {
        let parts = vec!["GeForce", "0", "not-a-number"];
        assert!(field::<u64>(&parts, 2, "memory.total").is_err());
        assert_eq!(field_or_zero::<f64>(&parts, 2), 0.0);
        // "[N/A]" power readings degrade to zero instead of failing the tick.
        let parts = vec!["[N/A]"];
        assert_eq!(field_or_zero::<f64>(&parts, 0), 0.0);
    }
}
