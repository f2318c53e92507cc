//! Registro de hardware → sensores → valores/status.
//!
//! Dados puros + validação: sem I/O, sem relógio (o timestamp vem de quem
//! chama) e sem persistência. Restaurar `enabled`/`interval` persistidos é
//! responsabilidade do [`Agent`](crate::agent::Agent), logo após o registro.

use crate::types::{
    Hardware, HardwareKey, HardwareName, KeyError, MAX_HARDWARE, MAX_SENSORS_PER_HARDWARE, Sensor,
    SensorType, NAME_CAPACITY, validate_identifier,
};

/// Falhas de validação do registro. O estado nunca muda quando há erro.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Chave de hardware inválida: {0}")]
    InvalidKey(KeyError),

    #[error("Tipo de sensor inválido: {0}")]
    InvalidSensorType(KeyError),

    #[error("Nome muito longo ({0} bytes, máximo {NAME_CAPACITY})")]
    NameTooLong(usize),

    #[error("Hardware já registrado: {0}")]
    DuplicateHardware(String),

    #[error("Sensor já existe: {hardware}:{sensor}")]
    DuplicateSensor { hardware: String, sensor: String },

    #[error("Hardware desconhecido: {0}")]
    UnknownHardware(String),

    #[error("Registro cheio (máximo {MAX_HARDWARE} hardwares)")]
    RegistryFull,

    #[error("Hardware {0} já tem {MAX_SENSORS_PER_HARDWARE} sensores")]
    SensorTableFull(String),
}

/// Coleção ordenada de hardwares, indexada pela chave.
///
/// A ordem de inserção é preservada para serialização determinística.
/// Nenhuma entrada é removida durante a operação normal.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    hardware: heapless::Vec<Hardware, MAX_HARDWARE>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ──────────────────────────────────────────
    // Registro
    // ──────────────────────────────────────────

    /// Registra um hardware novo (`enabled = true`, intervalo padrão).
    ///
    /// `name` vazio ou ausente assume a própria chave.
    pub fn register_hardware(&mut self, key: &str, name: Option<&str>) -> Result<(), RegistryError> {
        validate_identifier(key).map_err(RegistryError::InvalidKey)?;
        if self.has_hardware(key) {
            return Err(RegistryError::DuplicateHardware(key.into()));
        }
        if self.hardware.is_full() {
            return Err(RegistryError::RegistryFull);
        }

        let name = name.filter(|n| !n.is_empty()).unwrap_or(key);
        let name = HardwareName::try_from(name).map_err(|_| RegistryError::NameTooLong(name.len()))?;
        let key = HardwareKey::try_from(key).map_err(|_| {
            RegistryError::InvalidKey(KeyError::TooLong {
                len: key.len(),
                max: crate::types::KEY_CAPACITY,
            })
        })?;

        self.hardware
            .push(Hardware::new(key, name))
            .map_err(|_| RegistryError::RegistryFull)
    }

    /// Adiciona um sensor a um hardware existente (status `missing`, sem valor).
    pub fn add_sensor(&mut self, hardware_key: &str, sensor_type: &str) -> Result<(), RegistryError> {
        validate_identifier(sensor_type).map_err(RegistryError::InvalidSensorType)?;
        let hw = self
            .hardware_mut(hardware_key)
            .ok_or_else(|| RegistryError::UnknownHardware(hardware_key.into()))?;

        if hw.sensor(sensor_type).is_some() {
            return Err(RegistryError::DuplicateSensor {
                hardware: hardware_key.into(),
                sensor: sensor_type.into(),
            });
        }

        let kind = SensorType::try_from(sensor_type).map_err(|_| {
            RegistryError::InvalidSensorType(KeyError::TooLong {
                len: sensor_type.len(),
                max: crate::types::KEY_CAPACITY,
            })
        })?;
        let sensor = Sensor::new(kind, hw.enabled);
        hw.sensors
            .push(sensor)
            .map_err(|_| RegistryError::SensorTableFull(hardware_key.into()))
    }

    // ──────────────────────────────────────────
    // Consultas
    // ──────────────────────────────────────────

    pub fn has_hardware(&self, key: &str) -> bool {
        self.hardware(key).is_some()
    }

    pub fn has_sensor(&self, hardware_key: &str, sensor_type: &str) -> bool {
        self.sensor(hardware_key, sensor_type).is_some()
    }

    pub fn hardware(&self, key: &str) -> Option<&Hardware> {
        self.hardware.iter().find(|hw| hw.key.as_str() == key)
    }

    pub fn sensor(&self, hardware_key: &str, sensor_type: &str) -> Option<&Sensor> {
        self.hardware(hardware_key)?.sensor(sensor_type)
    }

    /// Todos os hardwares, na ordem de registro.
    pub fn iter(&self) -> impl Iterator<Item = &Hardware> {
        self.hardware.iter()
    }

    pub fn len(&self) -> usize {
        self.hardware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hardware.is_empty()
    }

    /// Total de sensores em todos os hardwares.
    pub fn sensor_count(&self) -> usize {
        self.hardware.iter().map(|hw| hw.sensors.len()).sum()
    }

    /// `false` para hardware desconhecido: sem registro, sem publicação.
    pub fn is_enabled(&self, key: &str) -> bool {
        self.hardware(key).is_some_and(|hw| hw.enabled)
    }

    // ──────────────────────────────────────────
    // Mutação
    // ──────────────────────────────────────────

    /// Registra um novo valor. Ignorado se hardware ou sensor não existem.
    ///
    /// Valores não finitos são gravados (com timestamp), mas deixam o sensor
    /// como `missing`.
    pub fn update_value(&mut self, hardware_key: &str, sensor_type: &str, value: f32, now_ms: u64) {
        let Some(hw) = self.hardware_mut(hardware_key) else {
            return;
        };
        let enabled = hw.enabled;
        let Some(sensor) = hw.sensor_mut(sensor_type) else {
            return;
        };

        sensor.last_value = Some(value);
        sensor.last_update_ms = now_ms;
        sensor.refresh_status(enabled);
    }

    /// Liga/desliga um hardware e propaga o status para todos os sensores.
    pub fn set_enabled(&mut self, hardware_key: &str, enabled: bool) {
        if let Some(hw) = self.hardware_mut(hardware_key) {
            hw.enabled = enabled;
            hw.cascade_status();
        }
    }

    pub fn set_interval(&mut self, hardware_key: &str, interval_ms: u32) {
        if let Some(hw) = self.hardware_mut(hardware_key) {
            hw.interval_ms = interval_ms;
        }
    }

    fn hardware_mut(&mut self, key: &str) -> Option<&mut Hardware> {
        self.hardware.iter_mut().find(|hw| hw.key.as_str() == key)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
