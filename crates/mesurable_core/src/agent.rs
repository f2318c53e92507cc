//! Agente de telemetria: fachada que o host dirige com `tick()`.
//!
//! Fluxo:
//! - mensagens de config/enable → mutação do registro → próximo tick →
//!   serializador → publicação
//! - leituras do host → [`Agent::publish_value`] → registro + tópico de valor
//!
//! Modelo cooperativo de uma thread só: eventos do transporte, reconexão e
//! agendador rodam todos dentro de [`Agent::tick`], em sequência. Nenhum
//! listener é chamado fora dele (ou de `handle_event`).

use crate::config::AppConfig;
use crate::connection::{ConnectListener, ConnectionManager, ConnectionState};
use crate::persistence::{Store, enabled_key, interval_key};
use crate::protocol::{
    Encoded, SystemInfo, build_config, build_hardware_manifest, build_status,
    build_status_envelope, format_value, parse_config_message, parse_enable_message,
};
use crate::registry::{Registry, RegistryError};
use crate::scheduler::{ScheduledAction, Scheduler};
use crate::topics::{TopicError, Topics};
use crate::transport::{BrokerAddr, Transport, TransportEvent};
use crate::types::{DEFAULT_INTERVAL_MS, HardwareKey, MAX_HARDWARE};
use tracing::{debug, info, warn};

/// Limite do documento de status.
pub const STATUS_CAPACITY: usize = 4096;
/// Limite do documento de config.
pub const CONFIG_CAPACITY: usize = 2048;
/// Limite do manifesto de hardware.
pub const MANIFEST_CAPACITY: usize = 4096;
/// Eventos do transporte processados por tick.
pub const MAX_EVENTS_PER_TICK: usize = 32;

/// `(hardware, intervalo_ms)` após uma mensagem de config.
pub type ConfigChangeListener = Box<dyn FnMut(&str, u32)>;
/// `(hardware, habilitado)` após uma mensagem de enable.
pub type EnableChangeListener = Box<dyn FnMut(&str, bool)>;

/// Fonte das informações descritivas do dispositivo.
pub trait SystemInfoSource {
    fn system_info(&mut self, uptime_ms: u64) -> SystemInfo;
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Tópicos inválidos: {0}")]
    Topic(#[from] TopicError),
}

pub struct Agent<T: Transport, S: Store> {
    topics: Topics,
    registry: Registry,
    connection: ConnectionManager<T>,
    scheduler: Scheduler,
    store: S,
    status_envelope: bool,
    started_ms: Option<u64>,
    system_info: Option<Box<dyn SystemInfoSource>>,
    on_connect: Option<ConnectListener>,
    on_config_change: Option<ConfigChangeListener>,
    on_enable_change: Option<EnableChangeListener>,
}

impl<T: Transport, S: Store> Agent<T, S> {
    pub fn new(config: &AppConfig, transport: T, store: S) -> Result<Self, AgentError> {
        let topics = Topics::new(&config.agent.module_id)?;
        let mut connection = ConnectionManager::new(transport, config.agent.reconnect_interval_ms);
        if let Some(broker) = config.broker_addr() {
            connection.set_broker(broker);
        }
        let schedule = &config.schedule;

        Ok(Self {
            topics,
            registry: Registry::new(),
            connection,
            scheduler: Scheduler::new(
                schedule.status_interval_ms,
                schedule.config_interval_ms,
                schedule.info_interval_ms,
            ),
            store,
            status_envelope: config.agent.status_envelope,
            started_ms: None,
            system_info: None,
            on_connect: None,
            on_config_change: None,
            on_enable_change: None,
        })
    }

    // ──────────────────────────────────────────
    // Inicialização
    // ──────────────────────────────────────────

    pub fn set_broker(&mut self, broker: BrokerAddr) {
        self.connection.set_broker(broker);
    }

    /// Primeira tentativa explícita de conexão. Depois disso só `tick` reconecta.
    pub fn begin(&mut self, now_ms: u64) -> bool {
        self.started_ms.get_or_insert(now_ms);
        info!("Módulo {} iniciando", self.topics.module_id());
        self.connection.connect(now_ms)
    }

    /// Desconexão explícita. Notifica `on_connect(false)` se havia conexão
    /// (ou tentativa) em andamento.
    pub fn disconnect(&mut self) {
        let previous = self.connection.state();
        self.connection.disconnect();
        if previous != ConnectionState::Disconnected {
            self.notify_connect(false);
        }
    }

    pub fn set_system_info_source(&mut self, source: Box<dyn SystemInfoSource>) {
        self.system_info = Some(source);
    }

    // ──────────────────────────────────────────
    // Registro
    // ──────────────────────────────────────────

    /// Registra o hardware e restaura `enabled`/intervalo persistidos.
    pub fn register_hardware(&mut self, key: &str, name: Option<&str>) -> Result<(), RegistryError> {
        self.registry.register_hardware(key, name)?;

        let enabled = self.store.load_bool(&enabled_key(key), true);
        self.registry.set_enabled(key, enabled);

        let stored = self
            .store
            .load_int(&interval_key(key), i64::from(DEFAULT_INTERVAL_MS));
        let interval = match u32::try_from(stored) {
            Ok(ms) if ms > 0 => ms,
            _ => {
                warn!("Intervalo persistido inválido para {key}: {stored}, usando padrão");
                DEFAULT_INTERVAL_MS
            }
        };
        self.registry.set_interval(key, interval);

        info!("Hardware registrado: {key} (enabled={enabled}, interval={interval}ms)");
        Ok(())
    }

    pub fn add_sensor(&mut self, hardware_key: &str, sensor_type: &str) -> Result<(), RegistryError> {
        self.registry.add_sensor(hardware_key, sensor_type)?;
        debug!("Sensor adicionado: {hardware_key}:{sensor_type}");
        Ok(())
    }

    // ──────────────────────────────────────────
    // Publicação de valores
    // ──────────────────────────────────────────

    /// Registra uma leitura e publica em `{module}/{hardware}/{sensor}`.
    ///
    /// Hardware desligado ou desconhecido: ignorado por completo. Valores
    /// não finitos vão para o registro mas não são publicados. Retorna
    /// `true` se o transporte aceitou a publicação.
    pub fn publish_value(&mut self, hardware_key: &str, sensor_type: &str, value: f32, now_ms: u64) -> bool {
        if !self.registry.is_enabled(hardware_key) || !self.registry.has_sensor(hardware_key, sensor_type) {
            return false;
        }
        self.registry.update_value(hardware_key, sensor_type, value, now_ms);

        let Some(payload) = format_value(value) else {
            debug!("{hardware_key}:{sensor_type} sem valor finito, nada publicado");
            return false;
        };
        let topic = match self.topics.value(hardware_key, sensor_type) {
            Ok(topic) => topic,
            Err(e) => {
                warn!("Tópico de {hardware_key}:{sensor_type}: {e}");
                return false;
            }
        };
        self.connection.publish(&topic, &payload, false)
    }

    // ──────────────────────────────────────────
    // Loop principal
    // ──────────────────────────────────────────

    /// Passo cooperativo: eventos do transporte, reconexão, agendador.
    pub fn tick(&mut self, now_ms: u64) {
        for _ in 0..MAX_EVENTS_PER_TICK {
            let Some(event) = self.connection.poll_event() else {
                break;
            };
            self.handle_event(event);
        }

        self.connection.tick(now_ms);

        for action in self.scheduler.poll(now_ms, self.connection.is_connected()) {
            self.run_action(action, now_ms);
        }
    }

    /// Entrega direta de um evento do transporte.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let was_connected = self.connection.is_connected();
                self.connection.on_transport_connected();
                if !was_connected {
                    self.setup_subscriptions();
                    self.notify_connect(true);
                }
            }
            TransportEvent::Disconnected => {
                let previous = self.connection.state();
                self.connection.on_transport_disconnected();
                if previous != ConnectionState::Disconnected {
                    self.notify_connect(false);
                }
            }
            TransportEvent::Message { topic, payload } => self.handle_message(&topic, &payload),
        }
    }

    fn setup_subscriptions(&mut self) {
        let config = self.topics.config.clone();
        let enable = self.topics.enable.clone();
        for topic in [config, enable] {
            if !self.connection.subscribe(&topic) {
                warn!("Falha ao assinar {topic}");
            }
        }
    }

    fn run_action(&mut self, action: ScheduledAction, now_ms: u64) {
        match action {
            ScheduledAction::Status => self.publish_status(now_ms),
            ScheduledAction::Config => self.publish_config(),
            ScheduledAction::ExtendedInfo => self.publish_extended_info(now_ms),
        }
    }

    fn uptime_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_ms.unwrap_or(0))
    }

    fn publish_status(&mut self, now_ms: u64) {
        let doc: Encoded<STATUS_CAPACITY> = if self.status_envelope {
            build_status_envelope(&self.registry, self.topics.module_id(), self.uptime_ms(now_ms))
        } else {
            build_status(&self.registry)
        };
        self.publish_document("status", &self.topics.status.clone(), &doc);
    }

    fn publish_config(&mut self) {
        let doc: Encoded<CONFIG_CAPACITY> = build_config(&self.registry);
        self.publish_document("config", &self.topics.config.clone(), &doc);
    }

    fn publish_extended_info(&mut self, now_ms: u64) {
        let uptime = self.uptime_ms(now_ms);
        let system = self.system_info.as_mut().map(|source| source.system_info(uptime));
        let doc: Encoded<MANIFEST_CAPACITY> = build_hardware_manifest(&self.registry, system.as_ref());
        self.publish_document("hardware", &self.topics.hardware.clone(), &doc);
    }

    fn publish_document<const N: usize>(&mut self, label: &str, topic: &str, doc: &Encoded<N>) {
        if !doc.is_complete() {
            warn!("Documento {label} truncado: {} entradas omitidas (limite {} bytes)", doc.skipped, N);
        }
        if doc.as_str().is_empty() {
            return;
        }
        let sent = self.connection.publish(topic, doc.as_str(), true);
        debug!("→ {label} {} bytes em {topic} (ok={sent})", doc.as_str().len());
    }

    // ──────────────────────────────────────────
    // Mensagens de entrada
    // ──────────────────────────────────────────

    fn handle_message(&mut self, topic: &str, payload: &str) {
        if topic == self.topics.config.as_str() {
            self.apply_config_message(payload);
        } else if topic == self.topics.enable.as_str() {
            self.apply_enable_message(payload);
        } else {
            debug!("Mensagem ignorada em {topic}");
        }
    }

    fn apply_config_message(&mut self, payload: &str) {
        let update = match parse_config_message(payload) {
            Ok(update) => update,
            Err(e) => {
                debug!("Config descartada: {e}");
                return;
            }
        };

        for key in update.intervals.keys() {
            if !self.registry.has_hardware(key) {
                debug!("Config para hardware desconhecido: {key}");
            }
        }

        // Só intervalos que mudaram: reler a própria config retida não faz nada.
        let mut changes: heapless::Vec<(HardwareKey, u32), MAX_HARDWARE> = heapless::Vec::new();
        for hw in self.registry.iter() {
            if let Some(ms) = update.interval_for(hw.key()).filter(|&ms| ms != hw.interval_ms()) {
                let _ = changes.push((hw.key.clone(), ms));
            }
        }

        for (key, interval_ms) in changes {
            self.registry.set_interval(&key, interval_ms);
            self.store.save_int(&interval_key(&key), i64::from(interval_ms));
            info!("Intervalo de {key} alterado para {interval_ms}ms");
            if let Some(listener) = self.on_config_change.as_mut() {
                listener(key.as_str(), interval_ms);
            }
        }
    }

    fn apply_enable_message(&mut self, payload: &str) {
        let msg = match parse_enable_message(payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Enable descartado: {e}");
                return;
            }
        };
        if !self.registry.has_hardware(&msg.hardware) {
            debug!("Enable para hardware desconhecido: {}", msg.hardware);
            return;
        }

        self.registry.set_enabled(&msg.hardware, msg.enabled);
        self.store.save_bool(&enabled_key(&msg.hardware), msg.enabled);
        info!("Hardware {} enabled={}", msg.hardware, msg.enabled);
        if let Some(listener) = self.on_enable_change.as_mut() {
            listener(msg.hardware.as_str(), msg.enabled);
        }
    }

    // ──────────────────────────────────────────
    // Listeners
    // ──────────────────────────────────────────

    pub fn on_connect(&mut self, listener: ConnectListener) {
        self.on_connect = Some(listener);
    }

    pub fn on_config_change(&mut self, listener: ConfigChangeListener) {
        self.on_config_change = Some(listener);
    }

    pub fn on_enable_change(&mut self, listener: EnableChangeListener) {
        self.on_enable_change = Some(listener);
    }

    fn notify_connect(&mut self, connected: bool) {
        if let Some(listener) = self.on_connect.as_mut() {
            listener(connected);
        }
    }

    // ──────────────────────────────────────────
    // Estado
    // ──────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_hardware_enabled(&self, hardware_key: &str) -> bool {
        self.registry.is_enabled(hardware_key)
    }

    pub fn module_id(&self) -> &str {
        self.topics.module_id()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        self.connection.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.connection.transport_mut()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, StoredValue};
    use crate::transport::MemoryTransport;
    use crate::types::SensorStatus;
    use std::cell::RefCell;
    use std::rc::Rc;

    type TestAgent = Agent<MemoryTransport, MemoryStore>;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.agent.module_id = "node".into();
        config.hardware.clear();
        config
    }

    fn agent_with(store: MemoryStore) -> TestAgent {
        let mut agent = Agent::new(&config(), MemoryTransport::new(), store).unwrap();
        agent.register_hardware("dht22", Some("DHT22")).unwrap();
        agent.add_sensor("dht22", "temperature").unwrap();
        agent.add_sensor("dht22", "humidity").unwrap();
        agent
    }

    fn agent() -> TestAgent {
        agent_with(MemoryStore::new())
    }

    /// Agente conectado em t=0 (evento entregue no tick de t=1).
    fn connected_agent() -> TestAgent {
        let mut agent = agent();
        assert!(agent.begin(0));
        agent.transport_mut().push_event(TransportEvent::Connected);
        agent.tick(1);
        assert!(agent.is_connected());
        agent
    }

    #[test]
    fn invalid_module_id_is_rejected() {
        let mut cfg = config();
        cfg.agent.module_id = "a/b".into();
        assert!(Agent::new(&cfg, MemoryTransport::new(), MemoryStore::new()).is_err());
    }

    #[test]
    fn registration_restores_persisted_state() {
        let mut store = MemoryStore::new();
        store.save_bool("en_dht22", false);
        store.save_int("iv_dht22", 30_000);

        let agent = agent_with(store);
        let hw = agent.registry().hardware("dht22").unwrap();
        assert!(!hw.is_enabled());
        assert_eq!(hw.interval_ms(), 30_000);
        assert!(!agent.is_hardware_enabled("dht22"));
    }

    #[test]
    fn invalid_persisted_interval_falls_back() {
        let mut store = MemoryStore::new();
        store.save_int("iv_dht22", -5);
        let agent = agent_with(store);
        assert_eq!(
            agent.registry().hardware("dht22").unwrap().interval_ms(),
            DEFAULT_INTERVAL_MS
        );
    }

    #[test]
    fn re_registration_is_rejected_without_side_effects() {
        let mut agent = agent();
        agent.registry.set_interval("dht22", 1_000);
        assert!(matches!(
            agent.register_hardware("dht22", Some("Other")),
            Err(RegistryError::DuplicateHardware(_))
        ));
        let hw = agent.registry().hardware("dht22").unwrap();
        assert_eq!(hw.name(), "DHT22");
        assert_eq!(hw.interval_ms(), 1_000);
    }

    #[test]
    fn begin_without_broker_fails() {
        let mut cfg = config();
        cfg.broker.host.clear();
        let mut agent: TestAgent = Agent::new(&cfg, MemoryTransport::new(), MemoryStore::new()).unwrap();
        assert!(!agent.begin(0));
        assert!(agent.transport().connect_attempts.is_empty());

        agent.set_broker(BrokerAddr::new("10.0.0.2", 1883));
        assert!(agent.begin(10));
        assert_eq!(agent.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_subscribes_then_notifies() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut agent = agent();
        let sink = Rc::clone(&seen);
        agent.on_connect(Box::new(move |c| sink.borrow_mut().push(c)));

        agent.begin(0);
        agent.transport_mut().push_event(TransportEvent::Connected);
        agent.tick(1);

        assert_eq!(
            agent.transport().subscriptions,
            vec!["node/sensors/config".to_string(), "node/sensors/enable".to_string()]
        );

        agent.transport_mut().push_event(TransportEvent::Disconnected);
        agent.tick(2);
        assert_eq!(*seen.borrow(), vec![true, false]);
        assert!(!agent.is_connected());
    }

    #[test]
    fn explicit_disconnect_notifies_listener_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut agent = agent();
        let sink = Rc::clone(&seen);
        agent.on_connect(Box::new(move |c| sink.borrow_mut().push(c)));

        agent.begin(0);
        agent.transport_mut().push_event(TransportEvent::Connected);
        agent.tick(1);
        agent.disconnect();

        assert_eq!(agent.connection_state(), ConnectionState::Disconnected);
        assert_eq!(agent.transport().disconnects, 1);
        assert_eq!(*seen.borrow(), vec![true, false]);

        // Evento atrasado do transporte e nova desconexão não repetem o aviso.
        agent.transport_mut().push_event(TransportEvent::Disconnected);
        agent.tick(2);
        agent.disconnect();
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    #[test]
    fn publish_value_when_connected() {
        let mut agent = connected_agent();
        assert!(agent.publish_value("dht22", "temperature", 23.5, 100));

        let published = agent.transport().published_on("node/dht22/temperature");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, "23.50");
        assert!(!published[0].retain);

        let sensor = agent.registry().sensor("dht22", "temperature").unwrap();
        assert_eq!(sensor.status(), SensorStatus::Ok);
        assert_eq!(sensor.last_update_ms(), 100);
    }

    #[test]
    fn publish_value_on_disabled_hardware_is_ignored() {
        let mut agent = connected_agent();
        agent.handle_event(TransportEvent::Message {
            topic: "node/sensors/enable".into(),
            payload: r#"{"hardware":"dht22","enabled":false}"#.into(),
        });

        assert!(!agent.publish_value("dht22", "temperature", 23.5, 100));
        assert!(agent.transport().published_on("node/dht22/temperature").is_empty());
        assert_eq!(
            agent.registry().sensor("dht22", "temperature").unwrap().last_value(),
            None
        );
        assert!(!agent.publish_value("ghost", "temperature", 1.0, 100));
    }

    #[test]
    fn publish_while_disconnected_only_updates_registry() {
        let mut agent = agent();
        assert!(!agent.publish_value("dht22", "humidity", 55.0, 10));
        assert!(agent.transport().published.is_empty());
        assert_eq!(
            agent.registry().sensor("dht22", "humidity").unwrap().last_value(),
            Some(55.0)
        );
    }

    #[test]
    fn nan_is_recorded_but_not_published() {
        let mut agent = connected_agent();
        assert!(!agent.publish_value("dht22", "temperature", f32::NAN, 10));
        assert!(agent.transport().published.is_empty());
        let sensor = agent.registry().sensor("dht22", "temperature").unwrap();
        assert_eq!(sensor.status(), SensorStatus::Missing);
        assert_eq!(sensor.last_update_ms(), 10);
    }

    #[test]
    fn status_is_published_on_schedule() {
        let mut agent = connected_agent();
        agent.publish_value("dht22", "temperature", 23.5, 100);
        agent.transport_mut().clear();

        agent.tick(4_999);
        assert!(agent.transport().published.is_empty());

        agent.tick(5_000);
        let status = agent.transport().published_on("node/sensors/status");
        assert_eq!(status.len(), 1);
        assert!(status[0].retain);
        assert_eq!(
            status[0].payload,
            r#"{"dht22:temperature":{"status":"ok","value":23.50},"dht22:humidity":{"status":"missing","value":null}}"#
        );
    }

    #[test]
    fn config_and_manifest_are_published_on_schedule() {
        let mut agent = connected_agent();
        agent.tick(60_000);
        let config = agent.transport().published_on("node/sensors/config");
        assert_eq!(config.len(), 1);
        assert_eq!(
            config[0].payload,
            r#"{"sensors":{"dht22":{"interval":60,"enabled":true}}}"#
        );

        agent.tick(300_000);
        let manifest = agent.transport().published_on("node/sensors/hardware");
        assert_eq!(manifest.len(), 1);
        assert!(manifest[0].payload.contains(r#""sensors":["temperature","humidity"]"#));
    }

    #[test]
    fn disable_message_shows_disabled_status() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut agent = connected_agent();
        let sink = Rc::clone(&seen);
        agent.on_enable_change(Box::new(move |hw: &str, en: bool| {
            sink.borrow_mut().push((hw.to_string(), en))
        }));

        agent.publish_value("dht22", "temperature", 23.5, 100);
        agent
            .transport_mut()
            .push_message("node/sensors/enable", r#"{"hardware":"dht22","enabled":false}"#);
        agent.tick(5_000);

        assert_eq!(*seen.borrow(), vec![("dht22".to_string(), false)]);
        assert_eq!(agent.store().get("en_dht22"), Some(StoredValue::Bool(false)));

        let status = agent.transport().published_on("node/sensors/status");
        assert!(status[0]
            .payload
            .contains(r#""dht22:temperature":{"status":"disabled","value":23.50}"#));
    }

    #[test]
    fn enable_for_unknown_hardware_is_dropped() {
        let seen = Rc::new(RefCell::new(0));
        let mut agent = connected_agent();
        let sink = Rc::clone(&seen);
        agent.on_enable_change(Box::new(move |_: &str, _: bool| *sink.borrow_mut() += 1));

        agent.handle_event(TransportEvent::Message {
            topic: "node/sensors/enable".into(),
            payload: r#"{"hardware":"ghost","enabled":false}"#.into(),
        });
        assert_eq!(*seen.borrow(), 0);
        assert!(agent.store().is_empty());
        assert!(!agent.registry().has_hardware("ghost"));
    }

    #[test]
    fn config_message_applies_interval_in_seconds() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut agent = connected_agent();
        let sink = Rc::clone(&seen);
        agent.on_config_change(Box::new(move |hw: &str, ms: u32| {
            sink.borrow_mut().push((hw.to_string(), ms))
        }));

        let payload = r#"{"sensors":{"dht22":{"interval":30},"ghost":{"interval":5}}}"#;
        agent.transport_mut().push_message("node/sensors/config", payload);
        agent.tick(10);

        assert_eq!(agent.registry().hardware("dht22").unwrap().interval_ms(), 30_000);
        assert_eq!(agent.store().get("iv_dht22"), Some(StoredValue::Int(30_000)));
        assert_eq!(*seen.borrow(), vec![("dht22".to_string(), 30_000)]);

        // Mesmo valor de novo: nada muda, listener não dispara.
        agent.transport_mut().push_message("node/sensors/config", payload);
        agent.tick(20);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn own_retained_config_echo_is_idempotent() {
        let seen = Rc::new(RefCell::new(0));
        let mut agent = connected_agent();
        let sink = Rc::clone(&seen);
        agent.on_config_change(Box::new(move |_: &str, _: u32| *sink.borrow_mut() += 1));

        agent.tick(60_000);
        let echo = agent.transport().published_on("node/sensors/config")[0].payload.clone();
        agent.transport_mut().push_message("node/sensors/config", &echo);
        agent.tick(60_001);

        assert_eq!(*seen.borrow(), 0);
        assert!(agent.store().is_empty());
    }

    #[test]
    fn malformed_messages_are_dropped() {
        let calls = Rc::new(RefCell::new(0));
        let mut agent = connected_agent();
        let (a, b) = (Rc::clone(&calls), Rc::clone(&calls));
        agent.on_config_change(Box::new(move |_: &str, _: u32| *a.borrow_mut() += 1));
        agent.on_enable_change(Box::new(move |_: &str, _: bool| *b.borrow_mut() += 1));

        for (topic, payload) in [
            ("node/sensors/config", "{not json"),
            ("node/sensors/config", r#"{"sensors":{"dht22":{"interval":"soon"}}}"#),
            ("node/sensors/enable", r#"{"hardware":"dht22"}"#),
            ("node/sensors/enable", "[]"),
            ("node/other", r#"{"hardware":"dht22","enabled":false}"#),
        ] {
            agent.transport_mut().push_message(topic, payload);
        }
        agent.tick(10);

        assert_eq!(*calls.borrow(), 0);
        let hw = agent.registry().hardware("dht22").unwrap();
        assert!(hw.is_enabled());
        assert_eq!(hw.interval_ms(), DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn reconnects_on_tick_after_interval() {
        let mut agent = connected_agent();
        agent.transport_mut().push_event(TransportEvent::Disconnected);
        agent.tick(1_000);
        assert_eq!(agent.transport().connect_attempts.len(), 1);

        agent.tick(4_999);
        assert_eq!(agent.transport().connect_attempts.len(), 1);
        agent.tick(5_000);
        assert_eq!(agent.transport().connect_attempts.len(), 2);
        assert_eq!(agent.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn status_fires_on_first_tick_after_reconnect() {
        let mut agent = connected_agent();
        agent.tick(5_000);
        agent.transport_mut().push_event(TransportEvent::Disconnected);
        agent.tick(6_000);
        agent.transport_mut().clear();

        agent.tick(20_000);
        assert!(agent.transport().published_on("node/sensors/status").is_empty());

        agent.transport_mut().push_event(TransportEvent::Connected);
        agent.tick(20_001);
        assert_eq!(agent.transport().published_on("node/sensors/status").len(), 1);
    }

    #[test]
    fn status_envelope_option() {
        let mut cfg = config();
        cfg.agent.status_envelope = true;
        let mut agent: TestAgent = Agent::new(&cfg, MemoryTransport::new(), MemoryStore::new()).unwrap();
        agent.begin(1_000);
        agent.transport_mut().push_event(TransportEvent::Connected);
        agent.tick(6_000);

        let status = agent.transport().published_on("node/sensors/status");
        assert_eq!(
            status[0].payload,
            r#"{"moduleId":"node","uptimeMs":5000,"sensors":{}}"#
        );
    }

    struct FixedInfo;

    impl SystemInfoSource for FixedInfo {
        fn system_info(&mut self, uptime_ms: u64) -> SystemInfo {
            SystemInfo {
                uptime_ms,
                free_memory_kb: 64,
                total_memory_kb: 256,
                platform: "test".into(),
            }
        }
    }

    #[test]
    fn manifest_includes_system_info() {
        let mut agent = connected_agent();
        agent.set_system_info_source(Box::new(FixedInfo));
        agent.tick(300_000);

        let manifest = agent.transport().published_on("node/sensors/hardware");
        let value: serde_json::Value = serde_json::from_str(&manifest[0].payload).unwrap();
        assert_eq!(value["system"]["uptimeMs"], 300_000);
        assert_eq!(value["system"]["platform"], "test");
        assert_eq!(value["hardware"][0]["key"], "dht22");
    }
}
