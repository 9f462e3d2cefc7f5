//! In-memory repository fakes for engine unit tests. The workflow store
//! keeps bookings and approvals behind one lock so the atomic operations
//! have the same all-or-nothing semantics as the SQL implementations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use motorpool_core::audit::AuditEntry;
use motorpool_core::conflict::find_conflict;
use motorpool_core::domain::approval::{Approval, ApprovalId, ApprovalStatus};
use motorpool_core::domain::booking::{Booking, BookingId, BookingStatus};
use motorpool_core::domain::fleet::{Driver, DriverId, Vehicle, VehicleId, VehicleStatus};
use motorpool_core::domain::user::{User, UserId};
use motorpool_core::workflow::{CancellationPlan, DecisionPlan};

use super::{
    ApprovalFilter, ApprovalRepository, AuditFilter, AuditLogRepository, BookingFilter,
    BookingRepository, CreateBookingOutcome, DriverRepository, Page, RepositoryError,
    UserRepository, VehicleRepository,
};

#[derive(Default)]
struct WorkflowState {
    bookings: HashMap<String, Booking>,
    approvals: HashMap<String, Approval>,
}

/// Bookings and approvals in one store, mirroring the fact that the SQL
/// side mutates both tables inside a single transaction.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<RwLock<WorkflowState>>,
}

fn page_slice<T>(mut items: Vec<T>, page: Page) -> Vec<T> {
    let offset = page.offset as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    items.truncate(page.limit as usize);
    items
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryWorkflowStore {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.bookings.get(&id.0).cloned())
    }

    async fn list(
        &self,
        filter: &BookingFilter,
        page: Page,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let state = self.state.read().await;
        let approver_bookings: Option<Vec<String>> = filter.approver.as_ref().map(|approver| {
            state
                .approvals
                .values()
                .filter(|approval| approval.approver.as_ref() == Some(approver))
                .map(|approval| approval.booking_id.0.clone())
                .collect()
        });

        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|booking| {
                filter.status.map_or(true, |status| booking.status == status)
                    && filter
                        .vehicle_id
                        .as_ref()
                        .map_or(true, |vehicle| booking.vehicle_id == *vehicle)
                    && filter
                        .requester
                        .as_ref()
                        .map_or(true, |requester| booking.requester == *requester)
                    && approver_bookings
                        .as_ref()
                        .map_or(true, |ids| ids.contains(&booking.id.0))
                    && filter.from.map_or(true, |from| booking.window.end() > from)
                    && filter.until.map_or(true, |until| booking.window.start() < until)
            })
            .cloned()
            .collect();
        bookings.sort_by_key(|booking| (booking.window.start(), booking.id.0.clone()));
        Ok(page_slice(bookings, page))
    }

    async fn create_with_approvals(
        &self,
        booking: &Booking,
        approvals: &[Approval],
    ) -> Result<CreateBookingOutcome, RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(colliding) =
            find_conflict(state.bookings.values(), &booking.vehicle_id, &booking.window)
        {
            return Ok(CreateBookingOutcome::Conflict(colliding.clone()));
        }

        state.bookings.insert(booking.id.0.clone(), booking.clone());
        for approval in approvals {
            state.approvals.insert(approval.id.0.clone(), approval.clone());
        }
        Ok(CreateBookingOutcome::Created)
    }

    async fn update_fields(
        &self,
        booking: &Booking,
        expected_status: BookingStatus,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.bookings.get_mut(&booking.id.0) {
            Some(stored) if stored.status == expected_status => {
                stored.driver_id = booking.driver_id.clone();
                stored.window = booking.window;
                stored.department = booking.department.clone();
                stored.notes = booking.notes.clone();
                stored.updated_at = booking.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_cancellation(&self, plan: &CancellationPlan) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let cancellable = state.bookings.get(&plan.booking.id.0).is_some_and(|stored| {
            matches!(stored.status, BookingStatus::Pending | BookingStatus::Approved)
        });
        if !cancellable {
            return Ok(false);
        }

        state.bookings.insert(plan.booking.id.0.clone(), plan.booking.clone());
        for approval in &plan.cancelled_approvals {
            if let Some(stored) = state.approvals.get_mut(&approval.id.0) {
                if stored.status == ApprovalStatus::Pending {
                    *stored = approval.clone();
                }
            }
        }
        Ok(true)
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryWorkflowStore {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.approvals.get(&id.0).cloned())
    }

    async fn find_for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let state = self.state.read().await;
        let mut approvals: Vec<Approval> = state
            .approvals
            .values()
            .filter(|approval| approval.booking_id == *booking_id)
            .cloned()
            .collect();
        approvals.sort_by_key(|approval| approval.level.number());
        Ok(approvals)
    }

    async fn list(
        &self,
        filter: &ApprovalFilter,
        page: Page,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let state = self.state.read().await;
        let mut approvals: Vec<Approval> = state
            .approvals
            .values()
            .filter(|approval| {
                filter.status.map_or(true, |status| approval.status == status)
                    && filter.level.map_or(true, |level| approval.level == level)
                    && filter
                        .booking_id
                        .as_ref()
                        .map_or(true, |booking| approval.booking_id == *booking)
                    && filter
                        .approver
                        .as_ref()
                        .map_or(true, |approver| approval.approver.as_ref() == Some(approver))
            })
            .cloned()
            .collect();
        approvals.sort_by_key(|approval| (approval.created_at, approval.level.number()));
        Ok(page_slice(approvals, page))
    }

    async fn apply_decision(&self, plan: &DecisionPlan) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let still_pending = state
            .approvals
            .get(&plan.approval.id.0)
            .is_some_and(Approval::is_pending);
        if !still_pending {
            return Ok(false);
        }

        state.approvals.insert(plan.approval.id.0.clone(), plan.approval.clone());
        if let Some(sibling) = &plan.sibling {
            if let Some(stored) = state.approvals.get_mut(&sibling.id.0) {
                if stored.status == ApprovalStatus::Pending {
                    *stored = sibling.clone();
                }
            }
        }
        if let Some(booking) = &plan.booking {
            state.bookings.insert(booking.id.0.clone(), booking.clone());
        }
        Ok(true)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLogRepository {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditLogRepository {
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: Page,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let matching: Vec<AuditEntry> = entries
            .iter()
            .filter(|entry| {
                filter.entity.map_or(true, |entity| entry.entity == entity)
                    && filter
                        .entity_id
                        .as_ref()
                        .map_or(true, |entity_id| entry.entity_id == *entity_id)
                    && filter.actor.as_ref().map_or(true, |actor| entry.actor.as_ref() == Some(actor))
                    && filter.action.map_or(true, |action| entry.action == action)
                    && filter.from.map_or(true, |from| entry.occurred_at >= from)
                    && filter.until.map_or(true, |until| entry.occurred_at < until)
            })
            .cloned()
            .collect();
        Ok(page_slice(matching, page))
    }
}

#[derive(Default)]
struct RegistryState {
    users: HashMap<String, User>,
    vehicles: HashMap<String, Vehicle>,
    drivers: HashMap<String, Driver>,
}

/// User directory plus fleet registries behind one handle.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<RwLock<RegistryState>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryRegistry {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.get(&id.0).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.users.insert(user.id.0.clone(), user.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl VehicleRepository for InMemoryRegistry {
    async fn find_by_id(&self, id: &VehicleId) -> Result<Option<Vehicle>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.vehicles.get(&id.0).cloned())
    }

    async fn insert(&self, vehicle: &Vehicle) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.vehicles.insert(vehicle.id.0.clone(), vehicle.clone());
        Ok(())
    }

    async fn transition_status(
        &self,
        id: &VehicleId,
        from: VehicleStatus,
        to: VehicleStatus,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.vehicles.get_mut(&id.0) {
            Some(vehicle) if vehicle.status == from => {
                vehicle.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl DriverRepository for InMemoryRegistry {
    async fn find_by_id(&self, id: &DriverId) -> Result<Option<Driver>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.drivers.get(&id.0).cloned())
    }

    async fn insert(&self, driver: &Driver) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.drivers.insert(driver.id.0.clone(), driver.clone());
        Ok(())
    }
}
