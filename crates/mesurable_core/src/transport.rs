//! Capacidade de transporte publish/subscribe.
//!
//! O núcleo só precisa disto; a implementação real (MQTT) fica no binário
//! do nó. [`MemoryTransport`] é a implementação em memória usada nos testes
//! e em hosts sem rede.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Porta MQTT padrão.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Usuário/senha do broker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Endereço do broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl BrokerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

impl fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Evento entregue pelo transporte ao agente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: String },
}

/// Transporte publish/subscribe, fire-and-forget.
///
/// Nenhum método bloqueia. Falhas viram `false`; o núcleo não re-tenta.
pub trait Transport {
    /// Pede uma tentativa de conexão. O resultado chega depois como evento.
    fn connect(&mut self, broker: &BrokerAddr) -> bool;

    fn disconnect(&mut self);

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool;

    fn subscribe(&mut self, topic: &str) -> bool;

    /// Próximo evento pendente, se houver.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}

// ──────────────────────────────────────────────
// Transporte em memória
// ──────────────────────────────────────────────

/// Mensagem publicada registrada pelo [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Transporte em memória: grava tudo e entrega eventos roteirizados.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub connect_attempts: Vec<BrokerAddr>,
    pub published: Vec<Published>,
    pub subscriptions: Vec<String>,
    pub disconnects: usize,
    /// Resposta de `publish`.
    pub fail_publish: bool,
    events: VecDeque<TransportEvent>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enfileira um evento para o próximo `poll_event`.
    pub fn push_event(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }

    pub fn push_message(&mut self, topic: &str, payload: &str) {
        self.push_event(TransportEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Publicações feitas num tópico, na ordem.
    pub fn published_on(&self, topic: &str) -> Vec<&Published> {
        self.published.iter().filter(|p| p.topic == topic).collect()
    }

    pub fn clear(&mut self) {
        self.published.clear();
        self.subscriptions.clear();
        self.connect_attempts.clear();
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, broker: &BrokerAddr) -> bool {
        self.connect_attempts.push(broker.clone());
        true
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        self.published.push(Published {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        });
        !self.fail_publish
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        self.subscriptions.push(topic.into());
        true
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}
