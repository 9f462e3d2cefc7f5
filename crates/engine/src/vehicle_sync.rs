//! Best-effort vehicle availability synchronization. Both flips are
//! guarded: activation only touches an available vehicle, release only an
//! in-use one, so a vehicle moved to maintenance or out_of_service by the
//! fleet registry is never clobbered. Failures are logged and swallowed;
//! they must not abort the caller's primary transition.

use std::sync::Arc;

use tracing::{debug, warn};

use motorpool_core::domain::fleet::{VehicleId, VehicleStatus};
use motorpool_core::workflow::VehicleEffect;
use motorpool_db::repositories::VehicleRepository;

#[derive(Clone)]
pub struct VehicleStatusSync {
    vehicles: Arc<dyn VehicleRepository>,
}

impl VehicleStatusSync {
    pub fn new(vehicles: Arc<dyn VehicleRepository>) -> Self {
        Self { vehicles }
    }

    pub async fn apply(&self, effect: VehicleEffect, vehicle_id: &VehicleId) {
        match effect {
            VehicleEffect::MarkInUse => self.mark_in_use(vehicle_id).await,
            VehicleEffect::Release => self.release(vehicle_id).await,
        }
    }

    pub async fn mark_in_use(&self, vehicle_id: &VehicleId) {
        match self
            .vehicles
            .transition_status(vehicle_id, VehicleStatus::Available, VehicleStatus::InUse)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(vehicle = %vehicle_id.0, "vehicle not available; in_use flip skipped")
            }
            Err(error) => {
                warn!(vehicle = %vehicle_id.0, %error, "vehicle status sync failed")
            }
        }
    }

    pub async fn release(&self, vehicle_id: &VehicleId) {
        match self
            .vehicles
            .transition_status(vehicle_id, VehicleStatus::InUse, VehicleStatus::Available)
            .await
        {
            Ok(true) => {}
            // Vehicle was never flipped, or the registry moved it to
            // maintenance in the meantime. Either way, leave it alone.
            Ok(false) => {
                debug!(vehicle = %vehicle_id.0, "vehicle not in_use; release skipped")
            }
            Err(error) => {
                warn!(vehicle = %vehicle_id.0, %error, "vehicle status sync failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use motorpool_core::domain::fleet::{Vehicle, VehicleId, VehicleStatus};
    use motorpool_db::repositories::{InMemoryRegistry, VehicleRepository};

    use super::VehicleStatusSync;

    async fn registry_with(status: VehicleStatus) -> InMemoryRegistry {
        let registry = InMemoryRegistry::default();
        registry
            .insert(&Vehicle {
                id: VehicleId("v-1".to_string()),
                label: "Transit Van".to_string(),
                status,
            })
            .await
            .expect("insert");
        registry
    }

    async fn status_of(registry: &InMemoryRegistry) -> VehicleStatus {
        registry
            .find_by_id(&VehicleId("v-1".to_string()))
            .await
            .expect("find")
            .expect("present")
            .status
    }

    #[tokio::test]
    async fn activation_flips_available_to_in_use() {
        let registry = registry_with(VehicleStatus::Available).await;
        let sync = VehicleStatusSync::new(Arc::new(registry.clone()));
        sync.mark_in_use(&VehicleId("v-1".to_string())).await;
        assert_eq!(status_of(&registry).await, VehicleStatus::InUse);
    }

    #[tokio::test]
    async fn release_never_touches_a_vehicle_in_maintenance() {
        let registry = registry_with(VehicleStatus::Maintenance).await;
        let sync = VehicleStatusSync::new(Arc::new(registry.clone()));
        sync.release(&VehicleId("v-1".to_string())).await;
        assert_eq!(status_of(&registry).await, VehicleStatus::Maintenance);
    }

    #[tokio::test]
    async fn missing_vehicle_degrades_silently() {
        let registry = InMemoryRegistry::default();
        let sync = VehicleStatusSync::new(Arc::new(registry));
        // Must not panic or error out.
        sync.release(&VehicleId("ghost".to_string())).await;
    }
}
