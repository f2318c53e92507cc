//! Host Monitor – leituras do próprio host via `sysinfo`.
//!
//! Sensores conhecidos:
//! - `cpu_usage`   — uso global da CPU (%)
//! - `ram_percent` — memória usada (%)
//! - `cpu_temp`    — maior temperatura de CPU nos components (°C)
//! - `uptime`      — tempo ligado do host (s)
//!
//! Sensor desconhecido ou sem leitura retorna `NaN`, que o agente registra
//! como `missing`.

use mesurable_core::{SystemInfo, SystemInfoSource};
use sysinfo::{Components, CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, info};

pub const HOST_SENSORS: [&str; 4] = ["cpu_usage", "ram_percent", "cpu_temp", "uptime"];

/// Monitor de hardware do host.
pub struct HostMonitor {
    sys: System,
    components: Components,
}

impl HostMonitor {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        let components = Components::new_with_refreshed_list();
        info!("Host monitor: {} components térmicos", components.list().len());

        Self { sys, components }
    }

    /// Atualiza CPU, memória e temperaturas.
    pub fn refresh(&mut self) {
        self.sys.refresh_cpu_all();
        self.sys.refresh_memory();
        self.components.refresh(true);
    }

    /// Leitura atual de `sensor` (após [`refresh`](Self::refresh)).
    pub fn read(&self, sensor: &str) -> f32 {
        let value = match sensor {
            "cpu_usage" => Some(self.sys.global_cpu_usage()),
            "ram_percent" => self.ram_percent(),
            "cpu_temp" => self.cpu_temp(),
            "uptime" => Some(System::uptime() as f32),
            _ => None,
        };
        if value.is_none() {
            debug!("Sem leitura para {sensor}");
        }
        value.unwrap_or(f32::NAN)
    }

    fn ram_percent(&self) -> Option<f32> {
        let total = self.sys.total_memory() as f64;
        let used = self.sys.used_memory() as f64;
        (total > 0.0).then(|| (used / total * 100.0) as f32)
    }

    /// Busca a temperatura da CPU nos components do sysinfo.
    fn cpu_temp(&self) -> Option<f32> {
        self.components
            .iter()
            .filter(|comp| {
                let label = comp.label().to_lowercase();
                ["cpu", "tctl", "tdie", "package", "core"]
                    .iter()
                    .any(|k| label.contains(k))
            })
            .filter_map(|comp| comp.temperature())
            .filter(|t| t.is_finite() && *t > 0.0 && *t < 150.0)
            .reduce(f32::max)
    }
}

// ──────────────────────────────────────────────
// Informações do sistema para o manifesto
// ──────────────────────────────────────────────

/// Memória e plataforma do host.
pub struct SystemProbe {
    sys: System,
    platform: String,
}

impl SystemProbe {
    pub fn new() -> Self {
        let platform = System::long_os_version()
            .or_else(System::name)
            .unwrap_or_else(|| std::env::consts::OS.to_string());
        Self {
            sys: System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
            ),
            platform,
        }
    }
}

impl SystemInfoSource for SystemProbe {
    fn system_info(&mut self, uptime_ms: u64) -> SystemInfo {
        self.sys.refresh_memory();
        SystemInfo {
            uptime_ms,
            free_memory_kb: self.sys.available_memory() / 1024,
            total_memory_kb: self.sys.total_memory() / 1024,
            platform: self.platform.clone(),
        }
    }
}
