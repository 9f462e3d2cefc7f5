//! Deterministic demo dataset for `motorpool seed` and integration tests:
//! a small directory (one admin, one approver per level, two employees) and
//! a three-vehicle fleet with two drivers.

use motorpool_core::domain::fleet::{
    Driver, DriverId, DriverStatus, Vehicle, VehicleId, VehicleStatus,
};
use motorpool_core::domain::user::{Role, User, UserId};

use crate::repositories::{
    DriverRepository, RepositoryError, SqlDriverRepository, SqlUserRepository,
    SqlVehicleRepository, UserRepository, VehicleRepository,
};
use crate::DbPool;

pub struct DemoDataset;

#[derive(Clone, Copy, Debug)]
pub struct SeedSummary {
    pub users: usize,
    pub vehicles: usize,
    pub drivers: usize,
}

#[derive(Clone, Debug)]
pub struct SeedVerification {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

fn demo_users() -> Vec<User> {
    let user = |id: &str, name: &str, role: Role, department: Option<&str>| User {
        id: UserId(id.to_string()),
        display_name: name.to_string(),
        role,
        department: department.map(str::to_string),
    };

    vec![
        user("admin-1", "Fleet Administrator", Role::Admin, Some("fleet_ops")),
        user("approver-l1-1", "Line Supervisor", Role::ApproverL1, Some("fleet_ops")),
        user("approver-l2-1", "Department Head", Role::ApproverL2, Some("fleet_ops")),
        user("employee-1", "Field Engineer", Role::Employee, Some("engineering")),
        user("employee-2", "Sales Representative", Role::Employee, Some("sales")),
    ]
}

fn demo_vehicles() -> Vec<Vehicle> {
    let vehicle = |id: &str, label: &str, status: VehicleStatus| Vehicle {
        id: VehicleId(id.to_string()),
        label: label.to_string(),
        status,
    };

    vec![
        vehicle("vehicle-1", "Transit Van 014", VehicleStatus::Available),
        vehicle("vehicle-2", "Pickup 221", VehicleStatus::Available),
        vehicle("vehicle-3", "Box Truck 307", VehicleStatus::Maintenance),
    ]
}

fn demo_drivers() -> Vec<Driver> {
    vec![
        Driver {
            id: DriverId("driver-1".to_string()),
            display_name: "Duty Driver A".to_string(),
            status: DriverStatus::Active,
        },
        Driver {
            id: DriverId("driver-2".to_string()),
            display_name: "Duty Driver B".to_string(),
            status: DriverStatus::Active,
        },
    ]
}

impl DemoDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
        let users = SqlUserRepository::new(pool.clone());
        let vehicles = SqlVehicleRepository::new(pool.clone());
        let drivers = SqlDriverRepository::new(pool.clone());

        let user_rows = demo_users();
        for user in &user_rows {
            users.insert(user).await?;
        }
        let vehicle_rows = demo_vehicles();
        for vehicle in &vehicle_rows {
            vehicles.insert(vehicle).await?;
        }
        let driver_rows = demo_drivers();
        for driver in &driver_rows {
            drivers.insert(driver).await?;
        }

        Ok(SeedSummary {
            users: user_rows.len(),
            vehicles: vehicle_rows.len(),
            drivers: driver_rows.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<SeedVerification, RepositoryError> {
        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_account")
            .fetch_one(pool)
            .await?;
        let admins: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_account WHERE role = 'admin'")
                .fetch_one(pool)
                .await?;
        let approvers: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT role) FROM user_account
             WHERE role IN ('approver_l1', 'approver_l2')",
        )
        .fetch_one(pool)
        .await?;
        let vehicles: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vehicle").fetch_one(pool).await?;
        let drivers: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM driver").fetch_one(pool).await?;

        let checks = vec![
            ("users_present", users >= 5),
            ("admin_present", admins >= 1),
            ("both_approver_levels_present", approvers == 2),
            ("vehicles_present", vehicles >= 3),
            ("drivers_present", drivers >= 2),
        ];
        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(SeedVerification { all_present, checks })
    }
}

#[cfg(test)]
mod tests {
    use super::DemoDataset;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_loads_and_verifies() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let summary = DemoDataset::load(&pool).await.expect("load");
        assert_eq!(summary.users, 5);

        let verification = DemoDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);

        // Seeding twice must be idempotent, not a constraint violation.
        DemoDataset::load(&pool).await.expect("reload");
    }
}
