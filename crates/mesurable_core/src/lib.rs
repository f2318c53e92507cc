//! # Mesurable Core
//!
//! Agente de telemetria de sensores sobre MQTT: registro de hardware e
//! sensores, serialização JSON limitada em buffer fixo, tratamento das
//! mensagens de controle, máquina de conexão e agendador de publicações.
//!
//! ## Módulos
//! - [`types`] – Hardware, sensores, status e chaves compostas
//! - [`registry`] – Tabela de hardware com capacidade fixa
//! - [`protocol`] – Documentos JSON de status/config/hardware e parse de entrada
//! - [`topics`] – Nomes de tópicos derivados do `module_id`
//! - [`transport`] – Capacidade de transporte MQTT (+ implementação em memória)
//! - [`connection`] – Estados da conexão e reconexão limitada
//! - [`scheduler`] – Publicações periódicas
//! - [`persistence`] – Estado persistido por hardware
//! - [`config`] – Configuração unificada via TOML
//! - [`agent`] – Fachada que junta tudo

pub mod types;
pub mod registry;
pub mod protocol;
pub mod topics;
pub mod transport;
pub mod connection;
pub mod scheduler;
pub mod persistence;
pub mod config;
pub mod agent;

// Re-exports convenientes
pub use agent::{Agent, AgentError, SystemInfoSource};
pub use config::AppConfig;
pub use connection::ConnectionState;
pub use persistence::{FileStore, MemoryStore, Store, StoreError};
pub use protocol::SystemInfo;
pub use registry::{Registry, RegistryError};
pub use transport::{BrokerAddr, MemoryTransport, Transport, TransportEvent};
pub use types::SensorStatus;
