use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Whether the workflow tables are present, for readiness probes.
pub async fn schema_ready(pool: &DbPool) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master
         WHERE type = 'table' AND name IN ('booking', 'approval', 'audit_log')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count == 3)
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "user_account",
        "vehicle",
        "driver",
        "booking",
        "approval",
        "audit_log",
        "idx_booking_vehicle_id",
        "idx_booking_requester_id",
        "idx_booking_status",
        "idx_booking_starts_at",
        "idx_approval_booking_id",
        "idx_approval_status_level",
        "idx_audit_log_entity",
        "idx_audit_log_actor_id",
        "idx_audit_log_action",
        "idx_audit_log_occurred_at",
    ];

    #[tokio::test]
    async fn migrations_create_baseline_objects() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let row = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("schema lookup");
            let count: i64 = row.try_get("count").expect("count column");
            assert_eq!(count, 1, "expected schema object `{object}`");
        }
    }

    #[tokio::test]
    async fn duplicate_booking_level_pair_is_rejected() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO user_account (id, display_name, role) VALUES ('u1', 'U', 'employee')")
            .execute(&pool)
            .await
            .expect("user");
        sqlx::query("INSERT INTO vehicle (id, label) VALUES ('v1', 'Van')")
            .execute(&pool)
            .await
            .expect("vehicle");
        sqlx::query(
            "INSERT INTO booking (id, requester_id, vehicle_id, starts_at, ends_at, status, created_at, updated_at)
             VALUES ('b1', 'u1', 'v1', '2030-01-01T08:00:00+00:00', '2030-01-01T10:00:00+00:00', 'pending', '2030-01-01T00:00:00+00:00', '2030-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("booking");

        let insert_approval = "INSERT INTO approval (id, booking_id, level, status, created_at, updated_at)
             VALUES (?, 'b1', 1, 'pending', '2030-01-01T00:00:00+00:00', '2030-01-01T00:00:00+00:00')";
        sqlx::query(insert_approval).bind("a1").execute(&pool).await.expect("first level row");
        let error = sqlx::query(insert_approval).bind("a2").execute(&pool).await;
        assert!(error.is_err(), "second level-1 row for the same booking must violate UNIQUE");
    }
}
