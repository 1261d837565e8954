use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Rewrite the WAL as the minimal event set that rebuilds current state.
    ///
    /// Holds the catalog lock and every laboratory's read lock until the new
    /// file is in place, so no write can land in the old file after its
    /// laboratory was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;

        let labs: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(labs.len());
        for ls in labs {
            guards.push(ls.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::LaboratoryCreated {
                id: guard.id,
                name: guard.name.clone(),
                code: guard.code.clone(),
            });
            if !guard.active {
                events.push(Event::LaboratoryStatusChanged {
                    id: guard.id,
                    active: false,
                });
            }
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    laboratory_id: guard.id,
                    owner: r.owner.clone(),
                    span: r.span,
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        info!("compacted WAL to {count} events across {} laboratories", guards.len());
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
