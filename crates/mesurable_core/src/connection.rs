//! Máquina de estados da conexão com o broker.
//!
//! ```text
//! DISCONNECTED ──connect()──▶ CONNECTING ──connected──▶ CONNECTED
//!      ▲                          │                         │
//!      └───────disconnected───────┴───────disconnected──────┘
//! ```
//!
//! Esta camada não modela timeout de CONNECTING: o transporte informa o
//! resultado da tentativa. Aqui só se limita a frequência das tentativas
//! (uma por `reconnect_interval_ms`), sempre contra o relógio monotônico
//! fornecido pelo host.

use crate::transport::{BrokerAddr, Transport, TransportEvent};
use tracing::{debug, info};

/// Intervalo padrão entre tentativas automáticas de reconexão (ms).
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Listener de conexão: `true` ao conectar, `false` ao perder a conexão.
pub type ConnectListener = Box<dyn FnMut(bool)>;

/// Dono do transporte; controla estado, tentativas e publicações.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    broker: Option<BrokerAddr>,
    state: ConnectionState,
    last_attempt_ms: u64,
    reconnect_interval_ms: u64,
    listener: Option<ConnectListener>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, reconnect_interval_ms: u64) -> Self {
        Self {
            transport,
            broker: None,
            state: ConnectionState::Disconnected,
            last_attempt_ms: 0,
            reconnect_interval_ms,
            listener: None,
        }
    }

    pub fn set_broker(&mut self, broker: BrokerAddr) {
        info!("Broker configurado: {broker}");
        self.broker = Some(broker);
    }

    pub fn broker(&self) -> Option<&BrokerAddr> {
        self.broker.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn last_attempt_ms(&self) -> u64 {
        self.last_attempt_ms
    }

    pub fn reconnect_interval_ms(&self) -> u64 {
        self.reconnect_interval_ms
    }

    /// Registra o listener de conexão, substituindo o anterior.
    pub fn on_connect(&mut self, listener: ConnectListener) {
        self.listener = Some(listener);
    }

    /// Pede uma tentativa de conexão.
    ///
    /// Sem broker configurado retorna `false` sem tocar no timer. Caso
    /// contrário reinicia o timer e retorna `true`, qualquer que seja o
    /// resultado da tentativa.
    pub fn connect(&mut self, now_ms: u64) -> bool {
        let Some(broker) = self.broker.as_ref() else {
            debug!("connect() ignorado: nenhum broker configurado");
            return false;
        };

        self.last_attempt_ms = now_ms;
        if self.state == ConnectionState::Connected {
            return true;
        }

        debug!("Conectando a {broker}...");
        self.state = if self.transport.connect(broker) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        };
        true
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        self.on_transport_disconnected();
    }

    pub fn on_transport_connected(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }
        self.state = ConnectionState::Connected;
        info!("Conectado ao broker");
        self.notify(true);
    }

    /// Também cobre tentativa que falhou (CONNECTING → DISCONNECTED).
    pub fn on_transport_disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if self.state == ConnectionState::Connected {
            info!("Conexão com o broker perdida");
        }
        self.state = ConnectionState::Disconnected;
        self.notify(false);
    }

    /// Reconexão automática, no máximo uma tentativa por intervalo.
    ///
    /// Retorna `true` se uma tentativa foi iniciada.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.is_connected() {
            return false;
        }
        if now_ms.saturating_sub(self.last_attempt_ms) < self.reconnect_interval_ms {
            return false;
        }
        self.last_attempt_ms = now_ms;
        self.connect(now_ms)
    }

    /// Publica se conectado; caso contrário é no-op (sem fila).
    pub fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.transport.publish(topic, payload, retain)
    }

    pub fn subscribe(&mut self, topic: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.transport.subscribe(topic)
    }

    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.transport.poll_event()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn notify(&mut self, connected: bool) {
        if let Some(listener) = self.listener.as_mut() {
            listener(connected);
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
