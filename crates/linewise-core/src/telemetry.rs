//! Process resource sampling shared by the analyzer and workers.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// One resource sample of the current process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// CPU usage since the previous sample, in percent of one core.
    pub cpu_percent: f32,
    /// CPU seconds the process has consumed since it started.
    pub cpu_seconds: f64,
}

/// Samples memory and CPU usage of the current process.
///
/// Each sampler keeps its own `sysinfo` state, so samplers are cheap to
/// create per call and never shared between threads.
pub struct ProcessSampler {
    system: System,
    pid: Option<Pid>,
}

impl ProcessSampler {
    /// Create a sampler for the current process.
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            tracing::debug!("current pid unavailable, resource samples will be zero");
        }
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Refresh and return the current usage.
    pub fn sample(&mut self) -> ResourceSample {
        let Some(pid) = self.pid else {
            return ResourceSample {
                memory_bytes: 0,
                cpu_percent: 0.0,
                cpu_seconds: 0.0,
            };
        };

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        // accumulated_cpu_time is in milliseconds.
        let (memory_bytes, cpu_percent, cpu_ms) = self
            .system
            .process(pid)
            .map(|p| (p.memory(), p.cpu_usage(), p.accumulated_cpu_time()))
            .unwrap_or((0, 0.0, 0));

        ResourceSample {
            memory_bytes,
            cpu_percent,
            cpu_seconds: cpu_ms as f64 / 1000.0,
        }
    }

    /// Resident memory in bytes, refreshed now.
    pub fn memory_bytes(&mut self) -> u64 {
        self.sample().memory_bytes
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_reports_resident_memory() {
        let mut sampler = ProcessSampler::new();
        let sample = sampler.sample();
        assert!(sample.memory_bytes > 0);
        assert!(sample.cpu_seconds >= 0.0);
    }

    #[test]
    fn test_first_sample_counts_earlier_cpu_work() {
        let started = std::time::Instant::now();
        let mut acc = 0u64;
        while started.elapsed() < std::time::Duration::from_millis(200) {
            acc = acc.wrapping_add(std::hint::black_box(acc ^ 0x9e37));
        }
        std::hint::black_box(acc);

        let sample = ProcessSampler::new().sample();
        assert!(sample.cpu_seconds > 0.0);
    }

    #[test]
    fn test_cpu_seconds_monotonic() {
        let mut sampler = ProcessSampler::new();
        let first = sampler.sample().cpu_seconds;
        let _busy: u64 = (0..200_000u64).map(|i| i.wrapping_mul(31)).sum();
        let second = sampler.sample().cpu_seconds;
        assert!(second >= first);
    }
}
