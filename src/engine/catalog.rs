use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// What `retire_laboratory` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    /// Never had reservations: removed outright.
    Deleted,
    /// Only past reservations: kept for history, deactivated.
    Deactivated,
}

fn required(field: &'static str, value: &str, max_len: usize) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::MissingField(field));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded(match field {
            "code" => "laboratory code too long",
            _ => "laboratory name too long",
        }));
    }
    Ok(value.to_string())
}

impl Engine {
    /// Caller holds the catalog lock.
    fn check_unique(&self, name: &str, code: &str, except: Option<Ulid>) -> Result<(), EngineError> {
        if let Some(owner) = self.names.get(name)
            && Some(*owner) != except
        {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        if let Some(owner) = self.codes.get(code)
            && Some(*owner) != except
        {
            return Err(EngineError::DuplicateCode(code.to_string()));
        }
        Ok(())
    }

    pub async fn create_laboratory(
        &self,
        id: Ulid,
        name: &str,
        code: &str,
    ) -> Result<LaboratoryInfo, EngineError> {
        let name = required("name", name, MAX_NAME_LEN)?;
        let code = required("code", code, MAX_CODE_LEN)?;

        let _catalog = self.catalog.lock().await;
        if self.state.len() >= MAX_LABORATORIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many laboratories"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.check_unique(&name, &code, None)?;

        let event = Event::LaboratoryCreated {
            id,
            name: name.clone(),
            code: code.clone(),
        };
        self.wal_append(&event).await?;
        let ls = LaboratoryState::new(id, name, code);
        let info = ls.info();
        self.insert_laboratory(ls);
        Ok(info)
    }

    /// Rename or recode an active laboratory.
    pub async fn update_laboratory(
        &self,
        id: Ulid,
        name: &str,
        code: &str,
    ) -> Result<LaboratoryInfo, EngineError> {
        let name = required("name", name, MAX_NAME_LEN)?;
        let code = required("code", code, MAX_CODE_LEN)?;

        let _catalog = self.catalog.lock().await;
        let ls = self
            .get_laboratory_state(&id)
            .ok_or(EngineError::LaboratoryUnavailable(id))?;
        let mut guard = ls.write().await;
        if !guard.active {
            return Err(EngineError::LaboratoryUnavailable(id));
        }
        self.check_unique(&name, &code, Some(id))?;

        let event = Event::LaboratoryUpdated { id, name, code };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Activate or deactivate. Setting the current value is a no-op.
    /// Deactivating follows the retire rule: refused while any reservation
    /// ends at or after `now`.
    pub async fn set_laboratory_active(
        &self,
        id: Ulid,
        active: bool,
        now: Timestamp,
    ) -> Result<LaboratoryInfo, EngineError> {
        let _catalog = self.catalog.lock().await;
        let ls = self
            .get_laboratory_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = ls.write().await;
        if guard.active && !active && guard.has_current_or_upcoming(now) {
            return Err(EngineError::HasUpcomingReservations(id));
        }
        if guard.active != active {
            let event = Event::LaboratoryStatusChanged { id, active };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(guard.info())
    }

    /// Remove a laboratory that never had reservations, deactivate one whose
    /// reservations are all over, refuse one with current or upcoming ones.
    pub async fn retire_laboratory(
        &self,
        id: Ulid,
        now: Timestamp,
    ) -> Result<Retirement, EngineError> {
        let _catalog = self.catalog.lock().await;
        let ls = self
            .get_laboratory_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = ls.write().await;

        if guard.reservations.is_empty() {
            let event = Event::LaboratoryDeleted { id };
            self.wal_append(&event).await?;
            // Writers that already cloned the Arc see an inactive lab once
            // they get the lock.
            guard.active = false;
            self.forget_laboratory(&guard);
            return Ok(Retirement::Deleted);
        }

        if guard.has_current_or_upcoming(now) {
            return Err(EngineError::HasUpcomingReservations(id));
        }

        if guard.active {
            let event = Event::LaboratoryStatusChanged { id, active: false };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(Retirement::Deactivated)
    }
}
