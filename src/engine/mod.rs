mod availability;
mod composer;
mod conflict;
mod coordinator;
mod error;
mod queries;
mod sweeper;

pub use availability::slot_candidates;
pub use conflict::{find_conflicts, find_item_conflicts, has_conflict, ConflictHit, ConflictScope};
pub use coordinator::{Coordinator, LockManager, MAX_TX_ATTEMPTS};
pub use error::EngineError;
pub use queries::AvailabilityCheck;
pub use sweeper::HoldSweeper;

use std::sync::Arc;

use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::{Salon, Service, Staff, StaffSelector};
use crate::notify::{Notifier, NotifyHub};
use crate::store::BookingStore;

/// The scheduling core. Read paths (slot listings, availability checks) are
/// advisory and lock-free; every booking write runs through the coordinator's
/// serializable transaction with advisory locks held.
pub struct Engine {
    store: Arc<BookingStore>,
    coordinator: Coordinator,
    sweeper: HoldSweeper,
    notify: Arc<NotifyHub>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<BookingStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            coordinator: Coordinator::new(),
            sweeper: HoldSweeper::new(config.sweep_every),
            notify: Arc::new(NotifyHub::new()),
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<BookingStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn notify_hub(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve a staff selector to a concrete, active member of `salon`.
    /// "Any available" picks the first active staff member, so read and
    /// write paths agree on whose calendar is in play.
    pub(crate) fn resolve_staff(
        &self,
        salon: &Salon,
        selector: StaffSelector,
    ) -> Result<Staff, EngineError> {
        match selector {
            StaffSelector::Specific(id) => {
                let staff = self
                    .store
                    .staff_member(&id)
                    .ok_or(EngineError::StaffNotFound(id))?;
                if staff.salon_id != salon.id {
                    return Err(EngineError::StaffNotInSalon {
                        staff_id: id,
                        salon_id: salon.id,
                    });
                }
                if !staff.active {
                    return Err(EngineError::StaffInactive(id));
                }
                Ok(staff)
            }
            StaffSelector::AnyAvailable => self
                .store
                .active_staff(&salon.id)
                .into_iter()
                .next()
                .ok_or(EngineError::NoStaffAvailable(salon.id)),
        }
    }

    /// Load an active service belonging to `salon`.
    pub(crate) fn salon_service(
        &self,
        salon: &Salon,
        service_id: Ulid,
    ) -> Result<Service, EngineError> {
        let service = self
            .store
            .service(&service_id)
            .ok_or(EngineError::ServiceNotFound(service_id))?;
        if service.salon_id != salon.id {
            return Err(EngineError::ServiceNotFound(service_id));
        }
        if !service.active {
            return Err(EngineError::ServiceInactive(service_id));
        }
        Ok(service)
    }
}
