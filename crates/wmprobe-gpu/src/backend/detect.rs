//! Backend report: one probe per backend, shared by listing and selection.

use super::{Backend, PowerPreference};

/// Probe result for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub backend: Backend,
    /// What the backend would run on, or why it cannot run.
    pub detail: String,
    pub available: bool,
}

impl BackendInfo {
    fn probe(backend: Backend, power: PowerPreference) -> Self {
        match backend.probe(power) {
            Ok(detail) => Self { backend, detail, available: true },
            Err(e) => Self { backend, detail: e.to_string(), available: false },
        }
    }
}

/// Probe each backend once, in [`Backend::PREFERENCE`] order.
pub fn detect_backends(power: PowerPreference) -> Vec<BackendInfo> {
    Backend::PREFERENCE
        .iter()
        .map(|&backend| BackendInfo::probe(backend, power))
        .collect()
}

/// First available entry of `report`; the CPU emulation otherwise.
pub fn select_best_backend(report: &[BackendInfo]) -> Backend {
    report
        .iter()
        .find(|info| info.available)
        .map_or(Backend::Cpu, |info| info.backend)
}

/// One line per entry, e.g. `[+] wgpu  Intel Arc (Vulkan)`.
pub fn describe_backends(report: &[BackendInfo]) -> String {
    report
        .iter()
        .map(|info| {
            let mark = if info.available { '+' } else { '-' };
            format!("[{mark}] {:<5} {}\n", info.backend.as_str(), info.detail)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(backend: Backend, available: bool, detail: &str) -> BackendInfo {
        BackendInfo { backend, detail: detail.into(), available }
    }

    #[test]
    fn test_report_follows_preference() {
        let report = detect_backends(PowerPreference::default());
        let order: Vec<Backend> = report.iter().map(|i| i.backend).collect();
        assert_eq!(order, Backend::PREFERENCE);

        let cpu = report.iter().find(|i| i.backend == Backend::Cpu).unwrap();
        assert!(cpu.available);
        assert!(cpu.detail.contains("rayon"));
    }

    #[test]
    fn test_select_skips_unavailable() {
        let no_gpu = [info(Backend::Wgpu, false, "no adapter"), info(Backend::Cpu, true, "host")];
        assert_eq!(select_best_backend(&no_gpu), Backend::Cpu);

        let gpu = [info(Backend::Wgpu, true, "adapter"), info(Backend::Cpu, true, "host")];
        assert_eq!(select_best_backend(&gpu), Backend::Wgpu);

        assert_eq!(select_best_backend(&[]), Backend::Cpu);
    }

    #[test]
    fn test_describe_lines() {
        let report = [
            info(Backend::Wgpu, false, "No suitable GPU adapter found"),
            info(Backend::Cpu, true, "host emulation, 4 rayon threads"),
        ];
        assert_eq!(
            describe_backends(&report),
            "[-] wgpu  No suitable GPU adapter found\n[+] cpu   host emulation, 4 rayon threads\n"
        );
    }
}
