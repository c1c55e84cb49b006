// Local durable store - one embedded log-structured tree per node, holding
// MessagePack-encoded records keyed by the client key

use std::path::Path;

use tracing::{debug, info};

use crate::codec::{decode_record, encode_record, Record};
use crate::error::{MecError, MecResult};

/// Thin wrapper over the embedded engine. The engine is internally
/// thread-safe; the handle is cheap to clone and share.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: sled::Db,
}

impl LocalStore {
    /// Open (or create) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> MecResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| MecError::Store(format!("create store root: {}", e)))?;
        let db = sled::open(root)?;
        info!("local store opened at {}", root.display());
        Ok(Self { db })
    }

    /// Store a record under `key`, overwriting any prior version. Conflict
    /// handling happens via the clock at read time, not here.
    pub fn put(&self, key: &str, record: &Record) -> MecResult<()> {
        debug!("store put: {} {} {}", key, record.content_type, record.clock);
        let encoded = encode_record(record)?;
        self.db.insert(key.as_bytes(), encoded)?;
        Ok(())
    }

    /// Fetch the record under `key`. A miss is `Ok(None)`, not an error.
    pub fn get(&self, key: &str) -> MecResult<Option<Record>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush buffered writes to disk.
    pub fn close(&self) -> MecResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
