//! Formato de fio do agente.
//!
//! Saída: documentos JSON compactos escritos em buffers de capacidade fixa
//! (`N` conhecido em tempo de compilação). Cada entrada é renderizada num
//! rascunho e só é anexada se ela *e* os tokens de fechamento couberem, então
//! o resultado é sempre JSON válido. Entradas que não cabem são contadas em
//! [`Encoded::skipped`].
//!
//! ```text
//! status   {"dht22:temperature":{"status":"ok","value":23.50},...}
//! config   {"sensors":{"dht22":{"interval":60,"enabled":true},...}}
//! hardware {"hardware":[{"key":"dht22","name":"DHT22",...}],"system":{...}}
//! ```
//!
//! Entrada: mensagens de configuração e habilitação, parseadas com
//! `serde_json`. Payload malformado vira [`ProtocolError`] e é descartado.

use crate::registry::Registry;
use crate::types::{Hardware, build_composite_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use tracing::debug;

/// Capacidade do rascunho de uma única entrada.
pub const ENTRY_CAPACITY: usize = 256;

/// Capacidade de um valor formatado (`f32::MIN` com duas casas cabe).
pub const VALUE_CAPACITY: usize = 48;

/// Token de valor ausente/inválido.
pub const NULL_TOKEN: &str = "null";

pub type ValueText = heapless::String<VALUE_CAPACITY>;
type Scratch = heapless::String<ENTRY_CAPACITY>;

/// Erros do protocolo de entrada.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Campo \"hardware\" vazio")]
    EmptyHardware,
}

// ──────────────────────────────────────────────
// Documento limitado
// ──────────────────────────────────────────────

/// Documento codificado dentro de um limite de `N` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded<const N: usize> {
    pub text: heapless::String<N>,
    /// Entradas omitidas por falta de espaço.
    pub skipped: usize,
}

impl<const N: usize> Encoded<N> {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// `true` se nenhuma entrada foi omitida.
    pub fn is_complete(&self) -> bool {
        self.skipped == 0
    }
}

/// Escritor que anexa entradas inteiras ou nada.
struct BoundedDoc<const N: usize> {
    out: heapless::String<N>,
    reserved: usize,
    entries: usize,
    skipped: usize,
    open: bool,
}

impl<const N: usize> BoundedDoc<N> {
    /// Abre o documento com `prefix`, reservando `reserved` bytes para o fechamento.
    fn open(prefix: &str, reserved: usize) -> Self {
        let mut out = heapless::String::new();
        let open = prefix.len() + reserved <= N && out.push_str(prefix).is_ok();
        Self {
            out,
            reserved,
            entries: 0,
            skipped: 0,
            open,
        }
    }

    /// Anexa uma entrada (com vírgula se necessário). Depois da primeira
    /// entrada que não cabe, todas as seguintes são omitidas.
    fn entry(&mut self, rendered: Result<&str, fmt::Error>) {
        let Ok(entry) = rendered else {
            self.skipped += 1;
            return;
        };
        if !self.open || self.skipped > 0 {
            self.skipped += 1;
            return;
        }

        let separator = usize::from(self.entries > 0);
        if self.out.len() + separator + entry.len() + self.reserved > N {
            self.skipped += 1;
            return;
        }
        if separator == 1 {
            let _ = self.out.push(',');
        }
        let _ = self.out.push_str(entry);
        self.entries += 1;
    }

    /// Fecha o documento. `suffix` precisa caber na reserva de `open`.
    fn close(self, suffix: &str) -> Encoded<N> {
        self.close_with_optional(suffix, None, "")
    }

    /// Fecha com `head` + `tail` (ambos dentro da reserva), inserindo
    /// `optional` entre eles só se ainda couber depois das entradas.
    fn close_with_optional(mut self, head: &str, optional: Option<&str>, tail: &str) -> Encoded<N> {
        if !self.open || head.len() + tail.len() > self.reserved || self.out.push_str(head).is_err() {
            return self.failed();
        }
        if let Some(extra) = optional {
            if self.out.len() + extra.len() + tail.len() <= N {
                let _ = self.out.push_str(extra);
            } else {
                debug!("Trecho opcional omitido: não cabe em {} bytes", N);
            }
        }
        if self.out.push_str(tail).is_err() {
            return self.failed();
        }
        Encoded {
            text: self.out,
            skipped: self.skipped,
        }
    }

    fn failed(&self) -> Encoded<N> {
        Encoded {
            text: heapless::String::new(),
            skipped: self.skipped + self.entries,
        }
    }
}

// ──────────────────────────────────────────────
// Formatação de valores
// ──────────────────────────────────────────────

/// Formata um valor com exatamente duas casas decimais.
///
/// Retorna `None` para NaN/infinito: esses valores viram `null`, nunca `0.00`.
pub fn format_value(value: f32) -> Option<ValueText> {
    if !value.is_finite() {
        return None;
    }
    let mut text = ValueText::new();
    write!(text, "{value:.2}").ok()?;
    Some(text)
}

fn write_value<W: fmt::Write>(w: &mut W, value: Option<f32>) -> fmt::Result {
    match value.and_then(format_value) {
        Some(text) => w.write_str(&text),
        None => w.write_str(NULL_TOKEN),
    }
}

/// Intervalo em segundos: inteiro quando múltiplo de 1000 ms, senão com ms.
fn write_interval_secs<W: fmt::Write>(w: &mut W, interval_ms: u32) -> fmt::Result {
    let (secs, millis) = (interval_ms / 1000, interval_ms % 1000);
    if millis == 0 {
        write!(w, "{secs}")
    } else {
        write!(w, "{secs}.{millis:03}")
    }
}

/// Escreve uma string JSON com escape.
fn write_json_str<W: fmt::Write>(w: &mut W, s: &str) -> fmt::Result {
    w.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => w.write_str("\\\"")?,
            '\\' => w.write_str("\\\\")?,
            '\n' => w.write_str("\\n")?,
            '\r' => w.write_str("\\r")?,
            '\t' => w.write_str("\\t")?,
            c if c.is_control() => write!(w, "\\u{:04x}", c as u32)?,
            c => w.write_char(c)?,
        }
    }
    w.write_char('"')
}

// ──────────────────────────────────────────────
// Status
// ──────────────────────────────────────────────

fn render_status_entries<const N: usize>(registry: &Registry, doc: &mut BoundedDoc<N>) {
    for hw in registry.iter() {
        for sensor in hw.sensors() {
            let mut scratch = Scratch::new();
            let rendered = (|| -> fmt::Result {
                let key = build_composite_key(hw.key(), sensor.kind()).map_err(|_| fmt::Error)?;
                // Hardware desligado sobrepõe o status gravado do sensor.
                let status = if hw.is_enabled() {
                    sensor.status()
                } else {
                    crate::types::SensorStatus::Disabled
                };
                write!(scratch, "\"{key}\":{{\"status\":\"{status}\",\"value\":")?;
                write_value(&mut scratch, sensor.finite_value())?;
                scratch.write_char('}')
            })();
            doc.entry(rendered.map(|_| scratch.as_str()));
        }
    }
}

/// Documento de status: chave composta → `{status, value}`, na ordem do registro.
///
/// Registro vazio produz exatamente `{}`.
pub fn build_status<const N: usize>(registry: &Registry) -> Encoded<N> {
    let mut doc = BoundedDoc::open("{", 1);
    render_status_entries(registry, &mut doc);
    doc.close("}")
}

/// Status embrulhado com os metadados do módulo.
pub fn build_status_envelope<const N: usize>(
    registry: &Registry,
    module_id: &str,
    uptime_ms: u64,
) -> Encoded<N> {
    let mut prefix = Scratch::new();
    let header = (|| -> fmt::Result {
        prefix.write_str("{\"moduleId\":")?;
        write_json_str(&mut prefix, module_id)?;
        write!(prefix, ",\"uptimeMs\":{uptime_ms},\"sensors\":{{")
    })();
    if header.is_err() {
        return Encoded {
            text: heapless::String::new(),
            skipped: registry.sensor_count(),
        };
    }

    let mut doc = BoundedDoc::open(&prefix, 2);
    render_status_entries(registry, &mut doc);
    doc.close("}}")
}

// ──────────────────────────────────────────────
// Config
// ──────────────────────────────────────────────

/// Documento de configuração atual: intervalo (segundos) e `enabled` por hardware.
///
/// Usa o mesmo esquema da mensagem de entrada, então reler a mensagem
/// retida não altera nada.
pub fn build_config<const N: usize>(registry: &Registry) -> Encoded<N> {
    let mut doc = BoundedDoc::open("{\"sensors\":{", 2);
    for hw in registry.iter() {
        let mut scratch = Scratch::new();
        let rendered = (|| -> fmt::Result {
            write!(scratch, "\"{}\":{{\"interval\":", hw.key())?;
            write_interval_secs(&mut scratch, hw.interval_ms())?;
            write!(scratch, ",\"enabled\":{}}}", hw.is_enabled())
        })();
        doc.entry(rendered.map(|_| scratch.as_str()));
    }
    doc.close("}}")
}

// ──────────────────────────────────────────────
// Hardware / sistema
// ──────────────────────────────────────────────

/// Informações descritivas do dispositivo anexadas ao manifesto.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub uptime_ms: u64,
    pub free_memory_kb: u64,
    pub total_memory_kb: u64,
    pub platform: String,
}

fn render_hardware(hw: &Hardware, scratch: &mut Scratch) -> fmt::Result {
    write!(scratch, "{{\"key\":\"{}\",\"name\":", hw.key())?;
    write_json_str(scratch, hw.name())?;
    write!(
        scratch,
        ",\"enabled\":{},\"intervalMs\":{},\"sensors\":[",
        hw.is_enabled(),
        hw.interval_ms()
    )?;
    for (i, sensor) in hw.sensors().iter().enumerate() {
        if i > 0 {
            scratch.write_char(',')?;
        }
        write!(scratch, "\"{}\"", sensor.kind())?;
    }
    scratch.write_str("]}")
}

/// Manifesto de hardware (ação de informação estendida).
///
/// O registro tem prioridade: o objeto `system` só entra se couber depois
/// de todas as entradas de hardware.
pub fn build_hardware_manifest<const N: usize>(
    registry: &Registry,
    system: Option<&SystemInfo>,
) -> Encoded<N> {
    let system_field = system.and_then(|info| match serde_json::to_string(info) {
        Ok(json) => Some(format!(",\"system\":{json}")),
        Err(e) => {
            debug!("Falha ao serializar system: {e}");
            None
        }
    });

    let mut doc = BoundedDoc::open("{\"hardware\":[", 2);
    for hw in registry.iter() {
        let mut scratch = Scratch::new();
        let rendered = render_hardware(hw, &mut scratch);
        doc.entry(rendered.map(|_| scratch.as_str()));
    }
    doc.close_with_optional("]", system_field.as_deref(), "}")
}

// ──────────────────────────────────────────────
// Mensagens de entrada
// ──────────────────────────────────────────────

/// Atualização de intervalos recebida em `{module}/sensors/config`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    /// hardware → intervalo em ms (já convertido de segundos).
    pub intervals: BTreeMap<String, u32>,
}

impl ConfigUpdate {
    pub fn interval_for(&self, hardware_key: &str) -> Option<u32> {
        self.intervals.get(hardware_key).copied()
    }
}

#[derive(Deserialize)]
struct RawConfigMessage {
    #[serde(default)]
    sensors: serde_json::Map<String, serde_json::Value>,
}

/// Converte segundos (inteiro ou fracionário) para ms.
fn interval_secs_to_ms(secs: f64) -> Option<u32> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    let ms = (secs * 1000.0).round();
    if ms < 1.0 || ms > f64::from(u32::MAX) {
        return None;
    }
    Some(ms as u32)
}

/// Parseia `{"sensors": {"<hw>": {"interval": <segundos>}, ...}}`.
///
/// Entradas sem `interval` ou com intervalo inválido são ignoradas
/// individualmente; só o JSON como um todo pode falhar.
pub fn parse_config_message(payload: &str) -> Result<ConfigUpdate, ProtocolError> {
    let raw: RawConfigMessage = serde_json::from_str(payload)?;

    let mut update = ConfigUpdate::default();
    for (key, entry) in raw.sensors {
        let Some(interval) = entry.get("interval") else {
            continue;
        };
        match interval.as_f64().and_then(interval_secs_to_ms) {
            Some(ms) => {
                update.intervals.insert(key, ms);
            }
            None => debug!("Intervalo inválido para {key}: {interval}"),
        }
    }
    Ok(update)
}

/// Mensagem recebida em `{module}/sensors/enable`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnableMessage {
    pub hardware: String,
    pub enabled: bool,
}

/// Parseia `{"hardware": "<key>", "enabled": <bool>}`. Ambos os campos são obrigatórios.
pub fn parse_enable_message(payload: &str) -> Result<EnableMessage, ProtocolError> {
    let msg: EnableMessage = serde_json::from_str(payload)?;
    if msg.hardware.is_empty() {
        return Err(ProtocolError::EmptyHardware);
    }
    Ok(msg)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_hardware("dht22", Some("DHT22 Temperature/Humidity"))
            .unwrap();
        reg.add_sensor("dht22", "temperature").unwrap();
        reg.add_sensor("dht22", "humidity").unwrap();
        reg.register_hardware("bh1750", None).unwrap();
        reg.add_sensor("bh1750", "lux").unwrap();
        reg
    }

    #[test]
    fn empty_registry_status_is_empty_object() {
        let doc = build_status::<64>(&Registry::new());
        assert_eq!(doc.as_str(), "{}");
        assert!(doc.is_complete());
    }

    #[test]
    fn status_scenario_ok_value() {
        let mut reg = Registry::new();
        reg.register_hardware("dht22", None).unwrap();
        reg.add_sensor("dht22", "temperature").unwrap();
        reg.update_value("dht22", "temperature", 23.5, 10);

        let doc = build_status::<256>(&reg);
        assert!(
            doc.as_str()
                .contains(r#""dht22:temperature":{"status":"ok","value":23.50}"#),
            "{}",
            doc.as_str()
        );
    }

    #[test]
    fn status_shows_disabled_over_recorded_value() {
        let mut reg = Registry::new();
        reg.register_hardware("dht22", None).unwrap();
        reg.add_sensor("dht22", "temperature").unwrap();
        reg.update_value("dht22", "temperature", 23.5, 10);
        reg.set_enabled("dht22", false);

        let doc = build_status::<256>(&reg);
        assert_eq!(
            doc.as_str(),
            r#"{"dht22:temperature":{"status":"disabled","value":23.50}}"#
        );
    }

    #[test]
    fn status_full_document() {
        let mut reg = sample_registry();
        reg.update_value("dht22", "temperature", 25.0, 1);
        reg.update_value("dht22", "humidity", f32::NAN, 1);

        let doc = build_status::<512>(&reg);
        assert_eq!(
            doc.as_str(),
            concat!(
                r#"{"dht22:temperature":{"status":"ok","value":25.00},"#,
                r#""dht22:humidity":{"status":"missing","value":null},"#,
                r#""bh1750:lux":{"status":"missing","value":null}}"#
            )
        );
        serde_json::from_str::<serde_json::Value>(doc.as_str()).unwrap();
    }

    #[test]
    fn two_decimal_formatting() {
        let cases = [
            (25.0, "25.00"),
            (23.5, "23.50"),
            (-3.25, "-3.25"),
            (0.0, "0.00"),
            (1013.1, "1013.10"),
        ];
        for (value, expected) in cases {
            assert_eq!(format_value(value).unwrap().as_str(), expected);
        }
        assert!(format_value(f32::MAX).unwrap().ends_with(".00"));
        assert!(format_value(f32::MIN).is_some());
        assert!(format_value(f32::NAN).is_none());
        assert!(format_value(f32::NEG_INFINITY).is_none());
    }

    #[test]
    fn status_stops_before_overflowing_entry() {
        let mut reg = sample_registry();
        reg.update_value("dht22", "temperature", 21.0, 1);

        let full = build_status::<512>(&reg);
        let first_entry_len = r#"{"dht22:temperature":{"status":"ok","value":21.00}}"#.len();

        let doc = build_status::<64>(&reg);
        assert_eq!(doc.as_str().len(), first_entry_len);
        assert_eq!(doc.skipped, 2);
        assert!(!doc.is_complete());
        assert!(full.as_str().starts_with(&doc.as_str()[..first_entry_len - 1]));
        serde_json::from_str::<serde_json::Value>(doc.as_str()).unwrap();
    }

    #[test]
    fn tiny_buffer_yields_empty_text() {
        let doc = build_status::<1>(&sample_registry());
        assert!(doc.as_str().is_empty());
        assert_eq!(doc.skipped, 3);

        let doc = build_status::<2>(&sample_registry());
        assert_eq!(doc.as_str(), "{}");
        assert_eq!(doc.skipped, 3);
    }

    #[test]
    fn envelope_wraps_status() {
        let mut reg = sample_registry();
        reg.update_value("bh1750", "lux", 310.0, 1);
        let doc = build_status_envelope::<512>(&reg, "greenhouse-1", 4200);
        let value: serde_json::Value = serde_json::from_str(doc.as_str()).unwrap();
        assert_eq!(value["moduleId"], "greenhouse-1");
        assert_eq!(value["uptimeMs"], 4200);
        assert_eq!(value["sensors"]["bh1750:lux"]["status"], "ok");
        assert!(doc.as_str().contains("310.00"));
    }

    #[test]
    fn config_document() {
        let mut reg = sample_registry();
        reg.set_interval("bh1750", 1_500);
        reg.set_enabled("bh1750", false);
        let doc = build_config::<256>(&reg);
        assert_eq!(
            doc.as_str(),
            r#"{"sensors":{"dht22":{"interval":60,"enabled":true},"bh1750":{"interval":1.500,"enabled":false}}}"#
        );
        assert_eq!(build_config::<64>(&Registry::new()).as_str(), r#"{"sensors":{}}"#);
    }

    #[test]
    fn config_document_reads_back() {
        let mut reg = sample_registry();
        reg.set_interval("bh1750", 1_500);
        let doc = build_config::<256>(&reg);
        let update = parse_config_message(doc.as_str()).unwrap();
        assert_eq!(update.interval_for("dht22"), Some(60_000));
        assert_eq!(update.interval_for("bh1750"), Some(1_500));
    }

    #[test]
    fn manifest_with_system_info() {
        let reg = sample_registry();
        let info = SystemInfo {
            uptime_ms: 1_000,
            free_memory_kb: 120,
            total_memory_kb: 320,
            platform: "esp32".into(),
        };
        let doc = build_hardware_manifest::<1024>(&reg, Some(&info));
        let value: serde_json::Value = serde_json::from_str(doc.as_str()).unwrap();
        assert_eq!(value["hardware"][0]["key"], "dht22");
        assert_eq!(value["hardware"][0]["name"], "DHT22 Temperature/Humidity");
        assert_eq!(value["hardware"][0]["sensors"][1], "humidity");
        assert_eq!(value["hardware"][1]["intervalMs"], 60_000);
        assert_eq!(value["system"]["platform"], "esp32");
        assert_eq!(value["system"]["totalMemoryKb"], 320);
    }

    #[test]
    fn manifest_keeps_hardware_over_system_when_tight() {
        let mut reg = Registry::new();
        reg.register_hardware("dht22", Some("DHT22")).unwrap();
        reg.add_sensor("dht22", "temperature").unwrap();
        let info = SystemInfo {
            uptime_ms: 123_456,
            free_memory_kb: 120,
            total_memory_kb: 320,
            platform: "esp32-s3 rev 0.2 / idf v5.1".into(),
        };

        let doc = build_hardware_manifest::<128>(&reg, Some(&info));
        assert!(doc.is_complete());
        let value: serde_json::Value = serde_json::from_str(doc.as_str()).unwrap();
        assert_eq!(value["hardware"][0]["key"], "dht22");
        assert!(value.get("system").is_none());

        // Com espaço sobrando, o system volta.
        let roomy = build_hardware_manifest::<512>(&reg, Some(&info));
        let value: serde_json::Value = serde_json::from_str(roomy.as_str()).unwrap();
        assert_eq!(value["system"]["uptimeMs"], 123_456);
    }

    #[test]
    fn manifest_escapes_names() {
        let mut reg = Registry::new();
        reg.register_hardware("relay", Some("Relay \"A\"\\B")).unwrap();
        let doc = build_hardware_manifest::<256>(&reg, None);
        let value: serde_json::Value = serde_json::from_str(doc.as_str()).unwrap();
        assert_eq!(value["hardware"][0]["name"], "Relay \"A\"\\B");
        assert!(value.get("system").is_none());
    }

    #[test]
    fn parse_config_converts_seconds() {
        let update =
            parse_config_message(r#"{"sensors":{"dht22":{"interval":30},"bh1750":{"interval":0.5}}}"#)
                .unwrap();
        assert_eq!(update.interval_for("dht22"), Some(30_000));
        assert_eq!(update.interval_for("bh1750"), Some(500));
    }

    #[test]
    fn parse_config_skips_bad_entries() {
        let update = parse_config_message(
            r#"{"sensors":{"a":{"interval":-5},"b":{"interval":"x"},"c":{},"d":7,"e":{"interval":2}}}"#,
        )
        .unwrap();
        assert_eq!(update.intervals.len(), 1);
        assert_eq!(update.interval_for("e"), Some(2_000));
    }

    #[test]
    fn parse_config_rejects_garbage() {
        assert!(matches!(
            parse_config_message("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(parse_config_message("{}").unwrap().intervals.is_empty());
    }

    #[test]
    fn parse_enable_message_fields() {
        let msg = parse_enable_message(r#"{"hardware":"dht22","enabled":false}"#).unwrap();
        assert_eq!(msg.hardware, "dht22");
        assert!(!msg.enabled);

        assert!(parse_enable_message(r#"{"hardware":"dht22"}"#).is_err());
        assert!(parse_enable_message(r#"{"enabled":true}"#).is_err());
        assert!(matches!(
            parse_enable_message(r#"{"hardware":"","enabled":true}"#),
            Err(ProtocolError::EmptyHardware)
        ));
    }
}
