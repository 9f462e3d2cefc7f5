//! Directory and fleet registries. Users and drivers are read-mostly here;
//! vehicles additionally expose the guarded status flip the synchronizer
//! relies on.

use sqlx::Row;

use motorpool_core::domain::fleet::{
    Driver, DriverId, DriverStatus, Vehicle, VehicleId, VehicleStatus,
};
use motorpool_core::domain::user::{Role, User, UserId};

use super::{DriverRepository, RepositoryError, UserRepository, VehicleRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn role_as_str(role: Role) -> &'static str {
    match role {
        Role::Employee => "employee",
        Role::ApproverL1 => "approver_l1",
        Role::ApproverL2 => "approver_l2",
        Role::Admin => "admin",
    }
}

// Strict on purpose: an unknown role string is a decode failure, never a
// silently permissive default.
fn parse_role(value: &str) -> Result<Role, RepositoryError> {
    match value {
        "employee" => Ok(Role::Employee),
        "approver_l1" => Ok(Role::ApproverL1),
        "approver_l2" => Ok(Role::ApproverL2),
        "admin" => Ok(Role::Admin),
        other => Err(RepositoryError::Decode(format!("unknown role `{other}`"))),
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, display_name, role, department FROM user_account WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
        let role: String = row.try_get("role").map_err(decode)?;

        Ok(Some(User {
            id: UserId(row.try_get("id").map_err(decode)?),
            display_name: row.try_get("display_name").map_err(decode)?,
            role: parse_role(&role)?,
            department: row.try_get("department").map_err(decode)?,
        }))
    }

    async fn insert(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_account (id, display_name, role, department) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 role = excluded.role,
                 department = excluded.department",
        )
        .bind(&user.id.0)
        .bind(&user.display_name)
        .bind(role_as_str(user.role))
        .bind(&user.department)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct SqlVehicleRepository {
    pool: DbPool,
}

impl SqlVehicleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn vehicle_status_as_str(status: VehicleStatus) -> &'static str {
    match status {
        VehicleStatus::Available => "available",
        VehicleStatus::InUse => "in_use",
        VehicleStatus::Maintenance => "maintenance",
        VehicleStatus::OutOfService => "out_of_service",
    }
}

fn parse_vehicle_status(value: &str) -> Result<VehicleStatus, RepositoryError> {
    match value {
        "available" => Ok(VehicleStatus::Available),
        "in_use" => Ok(VehicleStatus::InUse),
        "maintenance" => Ok(VehicleStatus::Maintenance),
        "out_of_service" => Ok(VehicleStatus::OutOfService),
        other => Err(RepositoryError::Decode(format!("unknown vehicle status `{other}`"))),
    }
}

#[async_trait::async_trait]
impl VehicleRepository for SqlVehicleRepository {
    async fn find_by_id(&self, id: &VehicleId) -> Result<Option<Vehicle>, RepositoryError> {
        let row = sqlx::query("SELECT id, label, status FROM vehicle WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
        let status: String = row.try_get("status").map_err(decode)?;

        Ok(Some(Vehicle {
            id: VehicleId(row.try_get("id").map_err(decode)?),
            label: row.try_get("label").map_err(decode)?,
            status: parse_vehicle_status(&status)?,
        }))
    }

    async fn insert(&self, vehicle: &Vehicle) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO vehicle (id, label, status) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 label = excluded.label,
                 status = excluded.status",
        )
        .bind(&vehicle.id.0)
        .bind(&vehicle.label)
        .bind(vehicle_status_as_str(vehicle.status))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition_status(
        &self,
        id: &VehicleId,
        from: VehicleStatus,
        to: VehicleStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE vehicle SET status = ? WHERE id = ? AND status = ?")
            .bind(vehicle_status_as_str(to))
            .bind(&id.0)
            .bind(vehicle_status_as_str(from))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct SqlDriverRepository {
    pool: DbPool,
}

impl SqlDriverRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn driver_status_as_str(status: DriverStatus) -> &'static str {
    match status {
        DriverStatus::Active => "active",
        DriverStatus::Inactive => "inactive",
    }
}

fn parse_driver_status(value: &str) -> Result<DriverStatus, RepositoryError> {
    match value {
        "active" => Ok(DriverStatus::Active),
        "inactive" => Ok(DriverStatus::Inactive),
        other => Err(RepositoryError::Decode(format!("unknown driver status `{other}`"))),
    }
}

#[async_trait::async_trait]
impl DriverRepository for SqlDriverRepository {
    async fn find_by_id(&self, id: &DriverId) -> Result<Option<Driver>, RepositoryError> {
        let row = sqlx::query("SELECT id, display_name, status FROM driver WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
        let status: String = row.try_get("status").map_err(decode)?;

        Ok(Some(Driver {
            id: DriverId(row.try_get("id").map_err(decode)?),
            display_name: row.try_get("display_name").map_err(decode)?,
            status: parse_driver_status(&status)?,
        }))
    }

    async fn insert(&self, driver: &Driver) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO driver (id, display_name, status) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 status = excluded.status",
        )
        .bind(&driver.id.0)
        .bind(&driver.display_name)
        .bind(driver_status_as_str(driver.status))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use motorpool_core::domain::fleet::{Vehicle, VehicleId, VehicleStatus};
    use motorpool_core::domain::user::{Role, User, UserId};

    use super::{SqlUserRepository, SqlVehicleRepository};
    use crate::repositories::{UserRepository, VehicleRepository};
    use crate::{connect_with_settings, migrations};

    async fn pool() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn users_round_trip_with_closed_roles() {
        let pool = pool().await;
        let repo = SqlUserRepository::new(pool.clone());
        repo.insert(&User {
            id: UserId("l2-1".to_string()),
            display_name: "Second Level".to_string(),
            role: Role::ApproverL2,
            department: Some("operations".to_string()),
        })
        .await
        .expect("insert");

        let user = repo
            .find_by_id(&UserId("l2-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(user.role, Role::ApproverL2);

        // An unknown role string must fail decoding, not default to anything.
        sqlx::query("UPDATE user_account SET role = 'superuser' WHERE id = 'l2-1'")
            .execute(&pool)
            .await
            .expect("corrupt role");
        assert!(repo.find_by_id(&UserId("l2-1".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn vehicle_status_flip_is_guarded() {
        let pool = pool().await;
        let repo = SqlVehicleRepository::new(pool);
        repo.insert(&Vehicle {
            id: VehicleId("v-1".to_string()),
            label: "Box Truck".to_string(),
            status: VehicleStatus::Maintenance,
        })
        .await
        .expect("insert");

        // Vehicle is in maintenance; a release flip must not touch it.
        let flipped = repo
            .transition_status(
                &VehicleId("v-1".to_string()),
                VehicleStatus::InUse,
                VehicleStatus::Available,
            )
            .await
            .expect("transition");
        assert!(!flipped);

        let vehicle = repo
            .find_by_id(&VehicleId("v-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(vehicle.status, VehicleStatus::Maintenance);
    }
}
