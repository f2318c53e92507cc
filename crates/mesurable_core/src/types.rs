//! Definição de tipos para o registro de hardware e sensores.
//!
//! Tudo aqui tem capacidade fixa (`heapless`): o agente roda em nós com
//! memória contada, então nenhuma coleção cresce sem limite. Strings que não
//! cabem na capacidade são rejeitadas com erro, nunca truncadas em silêncio.

use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Capacidades
// ──────────────────────────────────────────────

/// Número máximo de hardwares registrados.
pub const MAX_HARDWARE: usize = 16;

/// Número máximo de sensores por hardware.
pub const MAX_SENSORS_PER_HARDWARE: usize = 8;

/// Tamanho máximo (bytes) de uma chave de hardware ou tipo de sensor.
pub const KEY_CAPACITY: usize = 32;

/// Tamanho máximo (bytes) do nome de exibição.
pub const NAME_CAPACITY: usize = 64;

/// Chave composta = `hardware` + `:` + `sensor`.
pub const COMPOSITE_KEY_CAPACITY: usize = KEY_CAPACITY * 2 + 1;

/// Intervalo padrão de amostragem (ms).
pub const DEFAULT_INTERVAL_MS: u32 = 60_000;

/// Separador da chave composta.
pub const COMPOSITE_SEPARATOR: char = ':';

pub type HardwareKey = heapless::String<KEY_CAPACITY>;
pub type SensorType = heapless::String<KEY_CAPACITY>;
pub type HardwareName = heapless::String<NAME_CAPACITY>;
pub type CompositeKey = heapless::String<COMPOSITE_KEY_CAPACITY>;

// ──────────────────────────────────────────────
// Identificadores
// ──────────────────────────────────────────────

/// Erros de validação de identificadores e chaves compostas.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Identificador vazio")]
    Empty,

    #[error("Identificador muito longo ({len} bytes, máximo {max})")]
    TooLong { len: usize, max: usize },

    #[error("Caractere inválido no identificador: {0:?}")]
    InvalidChar(char),

    #[error("Chave composta sem separador ':'")]
    MissingSeparator,
}

/// Valida uma chave de hardware ou tipo de sensor.
///
/// Aceita apenas ASCII visível, sem os caracteres reservados de tópico MQTT
/// (`/`, `+`, `#`), o separador `:` e os que exigiriam escape em JSON.
pub fn validate_identifier(id: &str) -> Result<(), KeyError> {
    if id.is_empty() {
        return Err(KeyError::Empty);
    }
    if id.len() > KEY_CAPACITY {
        return Err(KeyError::TooLong {
            len: id.len(),
            max: KEY_CAPACITY,
        });
    }
    match id
        .chars()
        .find(|&c| !c.is_ascii_graphic() || matches!(c, ':' | '/' | '+' | '#' | '"' | '\\'))
    {
        Some(c) => Err(KeyError::InvalidChar(c)),
        None => Ok(()),
    }
}

/// Monta a chave composta `hardware:sensor`.
pub fn build_composite_key(hardware_key: &str, sensor_type: &str) -> Result<CompositeKey, KeyError> {
    for part in [hardware_key, sensor_type] {
        if part.is_empty() {
            return Err(KeyError::Empty);
        }
        if part.contains(COMPOSITE_SEPARATOR) {
            return Err(KeyError::InvalidChar(COMPOSITE_SEPARATOR));
        }
    }

    let len = hardware_key.len() + 1 + sensor_type.len();
    let too_long = KeyError::TooLong {
        len,
        max: COMPOSITE_KEY_CAPACITY,
    };

    let mut key = CompositeKey::new();
    key.push_str(hardware_key).map_err(|_| too_long.clone())?;
    key.push(COMPOSITE_SEPARATOR).map_err(|_| too_long.clone())?;
    key.push_str(sensor_type).map_err(|_| too_long)?;
    Ok(key)
}

/// Separa uma chave composta em `(hardware, sensor)`.
///
/// Divide no primeiro `:`. Falha se o separador não existir ou se algum
/// dos lados estiver vazio.
pub fn parse_composite_key(key: &str) -> Result<(&str, &str), KeyError> {
    let (hardware, sensor) = key
        .split_once(COMPOSITE_SEPARATOR)
        .ok_or(KeyError::MissingSeparator)?;
    if hardware.is_empty() || sensor.is_empty() {
        return Err(KeyError::Empty);
    }
    Ok((hardware, sensor))
}

// ──────────────────────────────────────────────
// Sensor
// ──────────────────────────────────────────────

/// Estado de saúde derivado de um sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Ok,
    Missing,
    Disabled,
}

impl SensorStatus {
    /// Deriva o status a partir do hardware dono e do último valor.
    pub fn derive(hardware_enabled: bool, value: Option<f32>) -> Self {
        match value {
            _ if !hardware_enabled => SensorStatus::Disabled,
            Some(v) if v.is_finite() => SensorStatus::Ok,
            _ => SensorStatus::Missing,
        }
    }

    /// Representação no formato de fio.
    pub fn as_str(self) -> &'static str {
        match self {
            SensorStatus::Ok => "ok",
            SensorStatus::Missing => "missing",
            SensorStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Um fluxo de medição de um hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub(crate) kind: SensorType,
    pub(crate) status: SensorStatus,
    pub(crate) last_value: Option<f32>,
    pub(crate) last_update_ms: u64,
}

impl Sensor {
    pub(crate) fn new(kind: SensorType, hardware_enabled: bool) -> Self {
        Self {
            kind,
            status: SensorStatus::derive(hardware_enabled, None),
            last_value: None,
            last_update_ms: 0,
        }
    }

    /// Tipo do sensor (ex: "temperature"), único dentro do hardware.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Status armazenado (já propagado a partir do hardware).
    pub fn status(&self) -> SensorStatus {
        self.status
    }

    /// Último valor aceito, se houver. Pode ser NaN.
    pub fn last_value(&self) -> Option<f32> {
        self.last_value
    }

    /// Valor utilizável para publicação: presente e finito.
    pub fn finite_value(&self) -> Option<f32> {
        self.last_value.filter(|v| v.is_finite())
    }

    /// Timestamp monotônico (ms) da última atualização, 0 se nunca.
    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    pub(crate) fn refresh_status(&mut self, hardware_enabled: bool) {
        self.status = SensorStatus::derive(hardware_enabled, self.last_value);
    }
}

// ──────────────────────────────────────────────
// Hardware
// ──────────────────────────────────────────────

/// Módulo físico/lógico registrado, dono de seus sensores.
#[derive(Debug, Clone, PartialEq)]
pub struct Hardware {
    pub(crate) key: HardwareKey,
    pub(crate) name: HardwareName,
    pub(crate) enabled: bool,
    pub(crate) interval_ms: u32,
    pub(crate) sensors: heapless::Vec<Sensor, MAX_SENSORS_PER_HARDWARE>,
}

impl Hardware {
    pub(crate) fn new(key: HardwareKey, name: HardwareName) -> Self {
        Self {
            key,
            name,
            enabled: true,
            interval_ms: DEFAULT_INTERVAL_MS,
            sensors: heapless::Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Sensores na ordem de cadastro.
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn sensor(&self, kind: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.kind.as_str() == kind)
    }

    pub(crate) fn sensor_mut(&mut self, kind: &str) -> Option<&mut Sensor> {
        self.sensors.iter_mut().find(|s| s.kind.as_str() == kind)
    }

    /// Recalcula o status de todos os sensores após mudar `enabled`.
    pub(crate) fn cascade_status(&mut self) {
        let enabled = self.enabled;
        for sensor in self.sensors.iter_mut() {
            sensor.refresh_status(enabled);
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
