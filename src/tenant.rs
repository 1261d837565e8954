use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::{MAX_TENANT_NAME_LEN, MAX_TENANTS};

/// One engine per tenant, where a tenant is the database name a client
/// connects with. Each engine owns `<data_dir>/<tenant>.wal` and a compactor.
pub struct TenantManager {
    /// Keyed by the sanitized name, so aliases of one file share one engine.
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Reduce a database name to the characters allowed in a WAL file name.
fn file_stem(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
    }
    let stem: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if stem.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    Ok(stem)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Engine for `tenant`, replaying its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        let stem = file_stem(tenant)?;
        if let Some(engine) = self.engines.get(&stem) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // The shard stays locked while the engine opens, so two first
        // connections can't both open the same file.
        let engine = match self.engines.entry(stem) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let path = self.data_dir.join(format!("{}.wal", slot.key()));
                let engine = Arc::new(Engine::new(path)?);
                info!("opened tenant {}", slot.key());
                tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
                slot.insert(engine).clone()
            }
        };

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
