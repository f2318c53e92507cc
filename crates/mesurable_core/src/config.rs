//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável descreve o módulo, o broker,
//! os intervalos do agendador e o hardware a registrar na partida.

use crate::connection::DEFAULT_RECONNECT_INTERVAL_MS;
use crate::scheduler::{
    DEFAULT_CONFIG_INTERVAL_MS, DEFAULT_INFO_INTERVAL_MS, DEFAULT_STATUS_INTERVAL_MS,
};
use crate::topics::validate_module_id;
use crate::transport::{BrokerAddr, DEFAULT_BROKER_PORT};
use crate::types::{MAX_HARDWARE, MAX_SENSORS_PER_HARDWARE, validate_identifier};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Identidade do módulo e comportamento do agente.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Prefixo de todos os tópicos
    pub module_id: String,
    /// Intervalo mínimo entre tentativas de reconexão (ms)
    pub reconnect_interval_ms: u64,
    /// Embrulha o status com `moduleId`/`uptimeMs`
    pub status_envelope: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            module_id: "mesurable-node".into(),
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            status_envelope: false,
        }
    }
}

/// Broker MQTT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Host do broker (vazio = sem conexão)
    pub host: String,
    pub port: u16,
    /// Usuário (vazio = broker anônimo)
    pub username: String,
    pub password: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_BROKER_PORT,
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Intervalos das publicações periódicas (ms). 0 desliga a ação.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub status_interval_ms: u64,
    pub config_interval_ms: u64,
    pub info_interval_ms: u64,
    /// Período do loop principal do nó
    pub tick_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
            config_interval_ms: DEFAULT_CONFIG_INTERVAL_MS,
            info_interval_ms: DEFAULT_INFO_INTERVAL_MS,
            tick_ms: 100,
        }
    }
}

/// Persistência local.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Caminho do arquivo (vazio = `mesurable.bin` ao lado do executável)
    pub path: String,
}

/// Hardware registrado na partida.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub key: String,
    /// Nome de exibição (vazio = a chave)
    pub name: String,
    pub sensors: Vec<String>,
}

/// Configuração raiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub broker: BrokerConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    pub hardware: Vec<HardwareConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            broker: BrokerConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            hardware: vec![HardwareConfig {
                key: "host".into(),
                name: "Host Monitor".into(),
                sensors: vec!["cpu_usage".into(), "ram_percent".into(), "cpu_temp".into()],
            }],
        }
    }
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        exe_dir().join("config.toml")
    }

    /// Caminho do arquivo de persistência.
    pub fn storage_path(&self) -> PathBuf {
        if self.storage.path.is_empty() {
            exe_dir().join("mesurable.bin")
        } else {
            PathBuf::from(&self.storage.path)
        }
    }

    /// Endereço do broker, se configurado.
    pub fn broker_addr(&self) -> Option<BrokerAddr> {
        let broker = &self.broker;
        if broker.host.is_empty() {
            return None;
        }
        let addr = BrokerAddr::new(&broker.host, broker.port);
        Some(if broker.username.is_empty() {
            addr
        } else {
            addr.with_credentials(&broker.username, &broker.password)
        })
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = validate_module_id(&self.agent.module_id) {
            errors.push(format!("module_id inválido: {e}"));
        }
        if self.agent.reconnect_interval_ms == 0 {
            errors.push("reconnect_interval_ms não pode ser 0".into());
        }
        if !self.broker.host.is_empty() && self.broker.port == 0 {
            errors.push("Porta do broker não pode ser 0".into());
        }
        if self.broker.username.is_empty() && !self.broker.password.is_empty() {
            errors.push("password configurado sem username".into());
        }
        if self.schedule.tick_ms == 0 || self.schedule.tick_ms > 10_000 {
            errors.push(format!(
                "tick_ms inválido: {} (1–10000)",
                self.schedule.tick_ms
            ));
        }
        if self.hardware.len() > MAX_HARDWARE {
            errors.push(format!(
                "{} hardwares configurados (máximo {MAX_HARDWARE})",
                self.hardware.len()
            ));
        }
        for hw in &self.hardware {
            if let Err(e) = validate_identifier(&hw.key) {
                errors.push(format!("Chave de hardware {:?} inválida: {e}", hw.key));
            }
            if hw.sensors.len() > MAX_SENSORS_PER_HARDWARE {
                errors.push(format!(
                    "Hardware {} tem {} sensores (máximo {MAX_SENSORS_PER_HARDWARE})",
                    hw.key,
                    hw.sensors.len()
                ));
            }
            for sensor in &hw.sensors {
                if let Err(e) = validate_identifier(sensor) {
                    errors.push(format!("Sensor {:?} de {} inválido: {e}", sensor, hw.key));
                }
            }
        }

        errors
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
        .unwrap_or_else(|_| PathBuf::from("."))
}
