//! Agendador das três publicações periódicas.
//!
//! Cada ação tem seu próprio `(intervalo, último disparo)`. Desconectado,
//! nada dispara e os timestamps ficam como estão: a ação sai no primeiro
//! tick após a reconexão, sem esperar um intervalo novo inteiro.

use serde::{Deserialize, Serialize};

/// Intervalo padrão da publicação de status (ms).
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 5_000;
/// Intervalo padrão da publicação de config (ms).
pub const DEFAULT_CONFIG_INTERVAL_MS: u64 = 60_000;
/// Intervalo padrão do manifesto de hardware/sistema (ms).
pub const DEFAULT_INFO_INTERVAL_MS: u64 = 300_000;

/// Ações periódicas, na ordem fixa de disparo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduledAction {
    Status,
    Config,
    ExtendedInfo,
}

impl ScheduledAction {
    pub const ALL: [ScheduledAction; 3] = [
        ScheduledAction::Status,
        ScheduledAction::Config,
        ScheduledAction::ExtendedInfo,
    ];

    fn index(self) -> usize {
        match self {
            ScheduledAction::Status => 0,
            ScheduledAction::Config => 1,
            ScheduledAction::ExtendedInfo => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    interval_ms: u64,
    last_fired_ms: u64,
}

impl Slot {
    /// Intervalo 0 desliga a ação.
    fn is_due(&self, now_ms: u64) -> bool {
        self.interval_ms > 0 && now_ms.saturating_sub(self.last_fired_ms) >= self.interval_ms
    }
}

/// Ações que dispararam num tick.
pub type DueActions = heapless::Vec<ScheduledAction, 3>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduler {
    slots: [Slot; 3],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(
            DEFAULT_STATUS_INTERVAL_MS,
            DEFAULT_CONFIG_INTERVAL_MS,
            DEFAULT_INFO_INTERVAL_MS,
        )
    }
}

impl Scheduler {
    pub fn new(status_ms: u64, config_ms: u64, info_ms: u64) -> Self {
        let slot = |interval_ms| Slot {
            interval_ms,
            last_fired_ms: 0,
        };
        Self {
            slots: [slot(status_ms), slot(config_ms), slot(info_ms)],
        }
    }

    pub fn interval_ms(&self, action: ScheduledAction) -> u64 {
        self.slots[action.index()].interval_ms
    }

    pub fn set_interval_ms(&mut self, action: ScheduledAction, interval_ms: u64) {
        self.slots[action.index()].interval_ms = interval_ms;
    }

    pub fn last_fired_ms(&self, action: ScheduledAction) -> u64 {
        self.slots[action.index()].last_fired_ms
    }

    /// Retorna as ações vencidas (Status, Config, ExtendedInfo) e marca
    /// `last_fired = now` para cada uma. Desconectado, retorna vazio.
    pub fn poll(&mut self, now_ms: u64, connected: bool) -> DueActions {
        let mut due = DueActions::new();
        if !connected {
            return due;
        }
        for action in ScheduledAction::ALL {
            let slot = &mut self.slots[action.index()];
            if slot.is_due(now_ms) {
                slot.last_fired_ms = now_ms;
                // Capacidade = número de ações.
                let _ = due.push(action);
            }
        }
        due
    }
}
