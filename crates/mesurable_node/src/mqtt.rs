//! Transporte MQTT sobre `rumqttc` (cliente síncrono, QoS 0).
//!
//! Cada tentativa de conexão cria uma sessão nova: `Client` + thread de rede
//! que itera a `Connection` e repassa eventos pelo channel. A thread termina
//! no primeiro erro, então uma nova tentativa só começa quando a máquina de
//! estados do agente pede `connect()` de novo.

use crossbeam_channel::{Receiver, Sender, bounded};
use mesurable_core::transport::{BrokerAddr, Transport, TransportEvent};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pedidos pendentes no cliente rumqttc.
const REQUEST_CAPACITY: usize = 64;
/// Eventos pendentes entre a thread de rede e o loop principal.
const EVENT_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Evento marcado com a geração da sessão que o produziu.
type Tagged = (u64, TransportEvent);

struct Session {
    client: Client,
    generation: u64,
}

pub struct MqttTransport {
    client_id: String,
    session: Option<Session>,
    generation: u64,
    tx: Sender<Tagged>,
    rx: Receiver<Tagged>,
}

impl MqttTransport {
    pub fn new(client_id: &str) -> Self {
        let (tx, rx) = bounded::<Tagged>(EVENT_CAPACITY);
        // rumqttc recusa client id vazio ou começando com espaço.
        let client_id = match client_id.trim() {
            "" => "mesurable-node",
            id => id,
        };
        Self {
            client_id: client_id.to_string(),
            session: None,
            generation: 0,
            tx,
            rx,
        }
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            // Derrubar o Client encerra a thread antiga.
            let _ = session.client.try_disconnect();
        }
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self, broker: &BrokerAddr) -> bool {
        self.close_session();
        self.generation += 1;
        let generation = self.generation;

        let mut options = MqttOptions::new(&self.client_id, &broker.host, broker.port);
        options.set_keep_alive(KEEP_ALIVE).set_clean_session(true);
        if let Some(creds) = &broker.credentials {
            options.set_credentials(&creds.username, &creds.password);
        }
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);

        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("mqtt-{generation}"))
            .spawn(move || network_loop(connection, &tx, generation));
        if let Err(e) = spawned {
            warn!("Falha ao criar thread de rede: {e}");
            return false;
        }

        debug!("Sessão MQTT {generation} → {broker}");
        self.session = Some(Session { client, generation });
        true
    }

    fn disconnect(&mut self) {
        self.close_session();
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        match session
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
        {
            Ok(()) => true,
            Err(e) => {
                debug!("Publish em {topic} recusado: {e}");
                false
            }
        }
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        session.client.try_subscribe(topic, QoS::AtMostOnce).is_ok()
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let current = self.session.as_ref().map(|s| s.generation);
        while let Ok((generation, event)) = self.rx.try_recv() {
            // Eventos de sessões já descartadas.
            if Some(generation) == current {
                return Some(event);
            }
        }
        None
    }
}

fn network_loop(mut connection: rumqttc::Connection, tx: &Sender<Tagged>, generation: u64) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT conectado (sessão {generation}, code {:?})", ack.code);
                if tx.send((generation, TransportEvent::Connected)).is_err() {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Ok(payload) = String::from_utf8(publish.payload.to_vec()) else {
                    debug!("Payload não UTF-8 em {}, descartado", publish.topic);
                    continue;
                };
                let event = TransportEvent::Message {
                    topic: publish.topic,
                    payload,
                };
                // Loop principal lento: descarta mensagens em vez de travar a rede.
                if tx.try_send((generation, event)).is_err() {
                    debug!("Channel cheio, descartando mensagem");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT sessão {generation} encerrada: {e}");
                let _ = tx.send((generation, TransportEvent::Disconnected));
                return;
            }
        }
    }
}
