use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::Pool;
use model::{AppointmentStatus, ServiceAppointment};
use tokio_postgres::types::Json;
use tokio_postgres::{Row, Transaction};
use tracing::debug;

use super::advisory_lock;
use crate::{AppointmentsRepository, RepositoryError};

/// PostgreSQL implementation of the AppointmentsRepository trait.
///
/// Slot-occupying writes lock `appointments:<date>` for the rest of the
/// transaction before re-reading that day's bookings.
pub struct PgAppointmentsRepository {
    pool: Pool,
}

impl PgAppointmentsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn appointment_from_row(row: &Row) -> Result<ServiceAppointment, RepositoryError> {
    let Json(appointment): Json<ServiceAppointment> = row.try_get("doc")?;
    Ok(appointment)
}

const ACTIVE_ON: &str = "SELECT doc FROM service_appointments WHERE date = $1 AND status <> 'Cancelled'";

async fn slot_is_free(tx: &Transaction<'_>, candidate: &ServiceAppointment) -> Result<bool, RepositoryError> {
    advisory_lock(tx, &format!("appointments:{}", candidate.date)).await?;
    let rows = tx.query(ACTIVE_ON, &[&candidate.date]).await?;
    for row in &rows {
        let existing = appointment_from_row(row)?;
        if candidate.conflicts_with(&existing) {
            debug!(candidate = %candidate.id, existing = %existing.id, "slot taken");
            return Ok(false);
        }
    }
    Ok(true)
}

const UPDATE: &str = "UPDATE service_appointments SET date = $2, status = $3, doc = $4 WHERE id = $1 AND status = $5";

#[async_trait]
impl AppointmentsRepository for PgAppointmentsRepository {
    async fn get(&self, id: &str) -> Result<Option<ServiceAppointment>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT doc FROM service_appointments WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(appointment_from_row).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ServiceAppointment>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT doc FROM service_appointments WHERE user_id = $1 ORDER BY date ASC, doc->>'time' ASC",
                &[&user_id],
            )
            .await?;
        rows.iter().map(appointment_from_row).collect()
    }

    async fn list_active_on(&self, date: NaiveDate) -> Result<Vec<ServiceAppointment>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client.query(ACTIVE_ON, &[&date]).await?;
        let mut appointments = rows.iter().map(appointment_from_row).collect::<Result<Vec<_>, _>>()?;
        appointments.sort_by_key(|a| a.time);
        Ok(appointments)
    }

    async fn insert_if_available(&self, appointment: &ServiceAppointment) -> Result<bool, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        if !slot_is_free(&tx, appointment).await? {
            return Ok(false);
        }
        let query = r#"
            INSERT INTO service_appointments (id, user_id, date, status, doc)
            VALUES ($1, $2, $3, $4, $5)
        "#;
        tx.execute(query, &[
            &appointment.id,
            &appointment.user_id,
            &appointment.date,
            &appointment.status.as_str(),
            &Json(appointment),
        ])
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_if_available(
        &self,
        appointment: &ServiceAppointment,
        expected: AppointmentStatus,
    ) -> Result<bool, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let row = tx
            .query_opt("SELECT status FROM service_appointments WHERE id = $1 FOR UPDATE", &[&appointment.id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let stored: String = row.try_get("status")?;
        if stored != expected.as_str() {
            return Err(RepositoryError::Conflict);
        }
        if !slot_is_free(&tx, appointment).await? {
            return Ok(false);
        }
        tx.execute(UPDATE, &[
            &appointment.id,
            &appointment.date,
            &appointment.status.as_str(),
            &Json(appointment),
            &expected.as_str(),
        ])
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update(&self, appointment: &ServiceAppointment, expected: AppointmentStatus) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let n = client
            .execute(UPDATE, &[
                &appointment.id,
                &appointment.date,
                &appointment.status.as_str(),
                &Json(appointment),
                &expected.as_str(),
            ])
            .await?;
        if n == 0 {
            let exists = client
                .query_opt("SELECT 1 FROM service_appointments WHERE id = $1", &[&appointment.id])
                .await?;
            return Err(if exists.is_some() { RepositoryError::Conflict } else { RepositoryError::NotFound });
        }
        Ok(())
    }
}
