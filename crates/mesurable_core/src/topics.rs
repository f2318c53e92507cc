//! Nomes de tópicos MQTT do módulo.
//!
//! ```text
//! {module}/{hardware}/{sensor}   valor (não retido)
//! {module}/sensors/status        status (retido)
//! {module}/sensors/config        config (retido na saída, assinado na entrada)
//! {module}/sensors/enable        habilitação (assinado)
//! {module}/sensors/hardware      manifesto de hardware (retido)
//! ```

use std::fmt::Write as _;

/// Capacidade máxima de um tópico.
pub const TOPIC_CAPACITY: usize = 128;

/// Tamanho máximo do identificador do módulo.
pub const MODULE_ID_CAPACITY: usize = 64;

pub type Topic = heapless::String<TOPIC_CAPACITY>;
pub type ModuleId = heapless::String<MODULE_ID_CAPACITY>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("Identificador de módulo vazio")]
    EmptyModuleId,

    #[error("Identificador de módulo muito longo ({0} bytes, máximo {MODULE_ID_CAPACITY})")]
    ModuleIdTooLong(usize),

    #[error("Caractere reservado no identificador de módulo: {0:?}")]
    ReservedChar(char),

    #[error("Tópico excede {TOPIC_CAPACITY} bytes")]
    TooLong,
}

/// Valida o identificador de módulo (prefixo de todos os tópicos).
pub fn validate_module_id(id: &str) -> Result<ModuleId, TopicError> {
    if id.is_empty() {
        return Err(TopicError::EmptyModuleId);
    }
    if let Some(c) = id.chars().find(|&c| matches!(c, '/' | '+' | '#') || c.is_control()) {
        return Err(TopicError::ReservedChar(c));
    }
    ModuleId::try_from(id).map_err(|_| TopicError::ModuleIdTooLong(id.len()))
}

/// Tópicos fixos de um módulo, montados uma vez na criação do agente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    module_id: ModuleId,
    pub status: Topic,
    pub config: Topic,
    pub enable: Topic,
    pub hardware: Topic,
}

impl Topics {
    pub fn new(module_id: &str) -> Result<Self, TopicError> {
        let module_id = validate_module_id(module_id)?;
        Ok(Self {
            status: module_topic(&module_id, "status")?,
            config: module_topic(&module_id, "config")?,
            enable: module_topic(&module_id, "enable")?,
            hardware: module_topic(&module_id, "hardware")?,
            module_id,
        })
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Tópico de valor: `{module}/{hardware}/{sensor}`.
    pub fn value(&self, hardware_key: &str, sensor_type: &str) -> Result<Topic, TopicError> {
        let mut topic = Topic::new();
        write!(topic, "{}/{hardware_key}/{sensor_type}", self.module_id)
            .map_err(|_| TopicError::TooLong)?;
        Ok(topic)
    }
}

fn module_topic(module_id: &str, leaf: &str) -> Result<Topic, TopicError> {
    let mut topic = Topic::new();
    write!(topic, "{module_id}/sensors/{leaf}").map_err(|_| TopicError::TooLong)?;
    Ok(topic)
}
