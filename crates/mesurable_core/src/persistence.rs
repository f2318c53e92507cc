//! Persistência chave/valor do estado de cada hardware.
//!
//! O núcleo só usa `load`/`save` de bool e inteiro. Chaves:
//! - `en_<hardware>` → habilitado
//! - `iv_<hardware>` → intervalo em ms
//!
//! [`FileStore`] grava o mapa inteiro em bincode a cada `save`, como uma
//! partição NVS; falhas de I/O são registradas e absorvidas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Falhas ao gravar o arquivo de persistência.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro de serialização: {0}")]
    Encode(#[from] bincode::Error),
}

/// Capacidade de armazenamento persistente.
pub trait Store {
    fn load_bool(&self, key: &str, default: bool) -> bool;
    fn save_bool(&mut self, key: &str, value: bool);
    fn load_int(&self, key: &str, default: i64) -> i64;
    fn save_int(&mut self, key: &str, value: i64);
}

/// Chave persistida do estado habilitado.
pub fn enabled_key(hardware_key: &str) -> String {
    format!("en_{hardware_key}")
}

/// Chave persistida do intervalo.
pub fn interval_key(hardware_key: &str) -> String {
    format!("iv_{hardware_key}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Bool(bool),
    Int(i64),
}

type ValueMap = BTreeMap<String, StoredValue>;

fn get_bool(values: &ValueMap, key: &str, default: bool) -> bool {
    match values.get(key) {
        Some(StoredValue::Bool(v)) => *v,
        _ => default,
    }
}

fn get_int(values: &ValueMap, key: &str, default: i64) -> i64 {
    match values.get(key) {
        Some(StoredValue::Int(v)) => *v,
        _ => default,
    }
}

// ──────────────────────────────────────────────
// Memória
// ──────────────────────────────────────────────

/// Armazenamento volátil.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: ValueMap,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Store for MemoryStore {
    fn load_bool(&self, key: &str, default: bool) -> bool {
        get_bool(&self.values, key, default)
    }

    fn save_bool(&mut self, key: &str, value: bool) {
        self.values.insert(key.into(), StoredValue::Bool(value));
    }

    fn load_int(&self, key: &str, default: i64) -> i64 {
        get_int(&self.values, key, default)
    }

    fn save_int(&mut self, key: &str, value: i64) {
        self.values.insert(key.into(), StoredValue::Int(value));
    }
}

// ──────────────────────────────────────────────
// Arquivo
// ──────────────────────────────────────────────

/// Armazenamento em arquivo bincode.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: ValueMap,
}

impl FileStore {
    /// Abre (ou começa vazio) o arquivo em `path`.
    pub fn open(path: &Path) -> Self {
        let values = match std::fs::read(path) {
            Ok(bytes) => match bincode::deserialize::<ValueMap>(&bytes) {
                Ok(values) => {
                    info!("{} valores persistidos carregados de {}", values.len(), path.display());
                    values
                }
                Err(e) => {
                    warn!("Arquivo de persistência corrompido {}: {e}", path.display());
                    ValueMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Sem arquivo de persistência em {}", path.display());
                ValueMap::new()
            }
            Err(e) => {
                warn!("Erro ao ler {}: {e}", path.display());
                ValueMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            values,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) {
        if let Err(e) = self.write_atomically() {
            warn!("Erro ao salvar {}: {e}", self.path.display());
        }
    }

    fn write_atomically(&self) -> Result<(), StoreError> {
        let bytes = bincode::serialize(&self.values)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn load_bool(&self, key: &str, default: bool) -> bool {
        get_bool(&self.values, key, default)
    }

    fn save_bool(&mut self, key: &str, value: bool) {
        self.values.insert(key.into(), StoredValue::Bool(value));
        self.flush();
    }

    fn load_int(&self, key: &str, default: i64) -> i64 {
        get_int(&self.values, key, default)
    }

    fn save_int(&mut self, key: &str, value: i64) {
        self.values.insert(key.into(), StoredValue::Int(value));
        self.flush();
    }
}
