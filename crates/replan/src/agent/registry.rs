//! Concurrent access to many sessions.
//!
//! Each session sits behind its own `tokio::sync::Mutex`, so turns for
//! different sessions run in parallel while a single session never has two
//! turns in flight. The outer map lock is held only long enough to look up
//! a handle, or to load one from the store on a miss.
//!
//! [`SessionRegistry::remove`] marks the slot removed while holding the
//! session lock. Callers that were already queued on that lock get
//! [`RegistryError::NotFound`] instead of a session that no longer exists,
//! so a deleted session is never written back to the store.

use super::events::{SessionReport, TurnReport};
use super::planner::PlannerLoop;
use crate::error::RegistryError;
use crate::session::{Goal, Session, SessionManifest, SessionStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as SessionLock, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info};

/// A registered session and whether it has since been removed.
pub struct SessionSlot {
    session: Session,
    removed: bool,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session,
            removed: false,
        }
    }
}

type Handle = Arc<SessionLock<SessionSlot>>;

/// Exclusive access to one session. Released on drop.
pub type SessionGuard = OwnedMappedMutexGuard<SessionSlot, Session>;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Handle>>,
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Handle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create, persist and register a new active session.
    pub fn create(&self, goal: Goal, max_tokens: u64) -> Result<String, RegistryError> {
        let session = Session::new(goal, max_tokens);
        self.store.save(&session)?;
        let id = session.id().to_string();
        self.map()
            .insert(id.clone(), Arc::new(SessionLock::new(SessionSlot::new(session))));
        info!("Created session {id}");
        Ok(id)
    }

    /// The handle for `id`, loading it from the store on first use.
    ///
    /// The load runs under the map lock so it cannot interleave with a
    /// `remove` deleting the same session.
    fn handle(&self, id: &str) -> Result<Handle, RegistryError> {
        let mut sessions = self.map();
        if let Some(handle) = sessions.get(id) {
            return Ok(handle.clone());
        }
        let session = self
            .store
            .load(id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        debug!("Loaded session {id} from store at turn {}", session.turn());
        let handle = Arc::new(SessionLock::new(SessionSlot::new(session)));
        sessions.insert(id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Hand out the session behind `slot` unless it was removed while the
    /// caller waited.
    fn admit(id: &str, slot: OwnedMutexGuard<SessionSlot>) -> Result<SessionGuard, RegistryError> {
        if slot.removed {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(OwnedMutexGuard::map(slot, |slot| &mut slot.session))
    }

    /// Make a stored session available without taking it.
    pub fn open(&self, id: &str) -> Result<(), RegistryError> {
        self.handle(id).map(|_| ())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map().contains_key(id)
    }

    /// Wait for exclusive access to `id`.
    pub async fn checkout(&self, id: &str) -> Result<SessionGuard, RegistryError> {
        let slot = self.handle(id)?.lock_owned().await;
        Self::admit(id, slot)
    }

    /// Exclusive access to `id`, or [`RegistryError::Busy`] if another caller
    /// holds it.
    pub fn try_checkout(&self, id: &str) -> Result<SessionGuard, RegistryError> {
        let slot = self
            .handle(id)?
            .try_lock_owned()
            .map_err(|_| RegistryError::Busy(id.to_string()))?;
        Self::admit(id, slot)
    }

    /// Run one turn of `id` and persist the result.
    pub async fn run_turn(
        &self,
        id: &str,
        planner: &PlannerLoop<'_>,
    ) -> Result<TurnReport, RegistryError> {
        let mut session = self.checkout(id).await?;
        let report = planner.run_turn(&mut session).await;
        self.store.save(&session)?;
        Ok(report)
    }

    /// Drive `id` to a terminal status, persisting after every turn.
    pub async fn run(
        &self,
        id: &str,
        planner: &PlannerLoop<'_>,
    ) -> Result<SessionReport, RegistryError> {
        let mut session = self.checkout(id).await?;
        Ok(planner.run(&mut session, Some(self.store.as_ref())).await?)
    }

    pub async fn snapshot(&self, id: &str) -> Result<SessionReport, RegistryError> {
        let session = self.checkout(id).await?;
        Ok(SessionReport::of(&session))
    }

    /// Attach a free-form user note to the session's state.
    pub async fn add_note(&self, id: &str, text: impl Into<String>) -> Result<(), RegistryError> {
        let mut session = self.checkout(id).await?;
        session.state_mut().add_note(text);
        session.touch();
        self.store.save(&session)?;
        Ok(())
    }

    /// Every stored session, newest first.
    pub fn list(&self) -> Result<Vec<SessionManifest>, RegistryError> {
        Ok(self.store.list()?)
    }

    /// Drop `id` from the store and from memory. Waits for any in-flight
    /// turn to finish first; callers queued behind it see `NotFound`.
    pub async fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        let handle = match self.handle(id) {
            Ok(handle) => handle,
            Err(RegistryError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let mut slot = handle.lock_owned().await;
        if slot.removed {
            return Ok(false);
        }
        // Delete first: if the store fails the session stays usable.
        self.store.delete(id)?;
        slot.removed = true;
        self.map().remove(id);
        info!("Removed session {id}");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(MemorySessionStore::new()))
    }

    #[tokio::test]
    async fn create_then_checkout() {
        let registry = registry();
        let id = registry.create(Goal::new("weather"), 500).unwrap();
        let session = registry.checkout(&id).await.unwrap();
        assert_eq!(session.budget().max_tokens(), 500);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_checkout_is_busy() {
        let registry = registry();
        let id = registry.create(Goal::new("weather"), 500).unwrap();
        let _held = registry.checkout(&id).await.unwrap();
        assert!(matches!(
            registry.try_checkout(&id),
            Err(RegistryError::Busy(busy)) if busy == id
        ));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.checkout("sess-missing").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn removed_slot_turns_away_queued_callers() {
        let registry = registry();
        let id = registry.create(Goal::new("weather"), 500).unwrap();
        let handle = registry.handle(&id).unwrap();

        assert!(registry.remove(&id).await.unwrap());
        let stale = handle.try_lock_owned().unwrap();
        assert!(matches!(
            SessionRegistry::admit(&id, stale),
            Err(RegistryError::NotFound(missing)) if missing == id
        ));
        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn open_loads_from_store() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let session = Session::new(Goal::new("persisted"), 100);
        store.save(&session).unwrap();

        let registry = SessionRegistry::new(store);
        assert!(!registry.contains(session.id()));
        registry.open(session.id()).unwrap();
        assert!(registry.contains(session.id()));
    }

    #[tokio::test]
    async fn notes_are_persisted_and_remove_deletes() {
        let registry = registry();
        let id = registry.create(Goal::new("weather"), 500).unwrap();
        registry.add_note(&id, "prefer Celsius").await.unwrap();

        let stored = registry.store().load(&id).unwrap().unwrap();
        assert_eq!(stored.state().notes()[0].text, "prefer Celsius");

        assert!(registry.remove(&id).await.unwrap());
        assert!(registry.store().load(&id).unwrap().is_none());
        assert!(!registry.remove(&id).await.unwrap());
    }
}
