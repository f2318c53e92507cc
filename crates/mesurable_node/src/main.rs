//! # Mesurable Node
//!
//! Lê sensores do host e publica via MQTT, com status/config retidos e
//! controle remoto de intervalo e habilitação por hardware.
//!
//! ## Uso
//! ```bash
//! mesurable_node              # usa config.toml ao lado do executável
//! RUST_LOG=debug mesurable_node
//! ```

mod monitor;
mod mqtt;

use mesurable_core::config::AppConfig;
use mesurable_core::{Agent, FileStore};
use monitor::{HOST_SENSORS, HostMonitor, SystemProbe};
use mqtt::MqttTransport;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config inválida: {e}");
        }
        std::process::exit(1);
    }

    // ── Agente ──
    let store = FileStore::open(&config.storage_path());
    let transport = MqttTransport::new(&config.agent.module_id);
    let mut agent = match Agent::new(&config, transport, store) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Falha ao criar agente: {e}");
            std::process::exit(1);
        }
    };
    agent.set_system_info_source(Box::new(SystemProbe::new()));
    agent.on_connect(Box::new(|connected| {
        if connected {
            info!("Broker online");
        } else {
            warn!("Broker offline, reconectando em segundo plano");
        }
    }));

    for hw in &config.hardware {
        let name = (!hw.name.is_empty()).then_some(hw.name.as_str());
        if let Err(e) = agent.register_hardware(&hw.key, name) {
            warn!("Hardware {} ignorado: {e}", hw.key);
            continue;
        }
        for sensor in &hw.sensors {
            if !HOST_SENSORS.contains(&sensor.as_str()) {
                warn!("{}:{sensor} não tem fonte no host, ficará missing", hw.key);
            }
            if let Err(e) = agent.add_sensor(&hw.key, sensor) {
                warn!("Sensor {}:{sensor} ignorado: {e}", hw.key);
            }
        }
    }

    // ── Hardware Monitor ──
    let mut monitor = HostMonitor::new();
    // Primeira leitura para inicializar contadores de CPU
    monitor.refresh();

    let tick = Duration::from_millis(config.schedule.tick_ms);
    let broker = config
        .broker_addr()
        .map(|b| b.to_string())
        .unwrap_or_else(|| "(nenhum)".into());

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   📡 MESURABLE NODE – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Módulo:    {}", agent.module_id());
    println!("  Broker:    {broker}");
    println!("  Hardware:  {}", agent.registry().len());
    println!("  Sensores:  {}", agent.registry().sensor_count());
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let start = Instant::now();
    let elapsed_ms = || u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut next_sample = vec![0_u64; config.hardware.len()];

    if !agent.begin(elapsed_ms()) {
        warn!("Sem broker configurado: apenas amostragem local");
    }

    loop {
        let cycle_start = Instant::now();
        let now = elapsed_ms();

        agent.tick(now);

        let mut refreshed = false;
        for (hw, next) in config.hardware.iter().zip(next_sample.iter_mut()) {
            let Some(interval_ms) = agent
                .registry()
                .hardware(&hw.key)
                .filter(|h| h.is_enabled())
                .map(|h| u64::from(h.interval_ms()))
            else {
                continue;
            };
            if now < *next {
                continue;
            }
            *next = now + interval_ms;

            if !refreshed {
                monitor.refresh();
                refreshed = true;
            }
            for sensor in &hw.sensors {
                agent.publish_value(&hw.key, sensor, monitor.read(sensor), now);
            }
        }

        // Dormir pelo tempo restante do tick
        let elapsed = cycle_start.elapsed();
        if elapsed < tick {
            std::thread::sleep(tick - elapsed);
        }
    }
}
