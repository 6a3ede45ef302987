//! Appointment scheduling against a single global service calendar.
//!
//! Two appointments conflict when their half-open `[start, end)` intervals
//! intersect on the same date and neither is cancelled. Writes that occupy a
//! slot go through the repository's check-and-write so concurrent bookings
//! cannot both win.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use model::appointment::clock;
use model::{
    AppointmentStatus, Identity, NotificationKind, ServiceAppointment, ServiceType, TimeInterval, VehicleInfo,
};
use repository::{AppointmentsRepository, RepositoryError};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::cart::MAX_WRITE_ATTEMPTS;
use crate::notify::{Notice, Notifier};
use crate::ServiceError;

/// Body of a booking request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointment {
    pub service: String,
    pub service_type: ServiceType,
    pub date: NaiveDate,
    #[serde(with = "clock")]
    pub time: NaiveTime,
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub vehicle: Option<VehicleInfo>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

/// Partial update of an appointment; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentChanges {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub service_type: Option<ServiceType>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "optional_clock")]
    pub time: Option<NaiveTime>,
    #[serde(default, rename = "duration")]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub vehicle: Option<VehicleInfo>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

impl AppointmentChanges {
    /// `current` with every present field replaced.
    fn apply(&self, current: &ServiceAppointment) -> ServiceAppointment {
        let mut next = current.clone();
        if let Some(service) = &self.service {
            next.service = service.clone();
        }
        if let Some(service_type) = self.service_type {
            next.service_type = service_type;
        }
        next.date = self.date.unwrap_or(next.date);
        next.time = self.time.unwrap_or(next.time);
        next.duration_minutes = self.duration_minutes.unwrap_or(next.duration_minutes);
        if self.notes.is_some() {
            next.notes = self.notes.clone();
        }
        if self.vehicle.is_some() {
            next.vehicle = self.vehicle.clone();
        }
        if self.location_id.is_some() {
            next.location_id = self.location_id.clone();
        }
        if self.payment_method_id.is_some() {
            next.payment_method_id = self.payment_method_id.clone();
        }
        next
    }
}

fn optional_clock<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(with = "clock")] NaiveTime);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(t)| t))
}

/// Admin status moves: Scheduled → In Progress → Completed, with
/// cancellation allowed before completion.
pub fn check_appointment_transition(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), ServiceError> {
    use AppointmentStatus::*;

    match (from, to) {
        (Scheduled, InProgress) | (InProgress, Completed) | (Scheduled, Cancelled) | (InProgress, Cancelled) => Ok(()),
        _ => Err(ServiceError::transition(from, to)),
    }
}

fn validate_duration(duration_minutes: u32) -> Result<(), ServiceError> {
    if duration_minutes < 1 {
        return Err(ServiceError::Validation("duration must be at least 1 minute".into()));
    }
    Ok(())
}

pub struct AppointmentService {
    repo: Arc<dyn AppointmentsRepository>,
    notifier: Arc<Notifier>,
    hours_start: NaiveTime,
    hours_end: NaiveTime,
    step: Duration,
}

impl AppointmentService {
    pub fn new(
        repo: Arc<dyn AppointmentsRepository>,
        notifier: Arc<Notifier>,
        hours_start: NaiveTime,
        hours_end: NaiveTime,
        step_minutes: u32,
    ) -> Self {
        Self {
            repo,
            notifier,
            hours_start,
            hours_end,
            step: Duration::minutes(i64::from(step_minutes.max(1))),
        }
    }

    /// Whether `[date time, +duration)` is free of active bookings, ignoring
    /// the appointment `exclude` (used when rescheduling).
    #[instrument(skip(self))]
    pub async fn is_time_slot_available(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: u32,
        exclude: Option<&str>,
    ) -> Result<bool, ServiceError> {
        validate_duration(duration_minutes)?;
        let wanted = TimeInterval::new(date, time, duration_minutes);
        let booked = self.repo.list_active_on(date).await?;
        Ok(!booked
            .iter()
            .filter(|a| Some(a.id.as_str()) != exclude)
            .any(|a| a.interval().overlaps(&wanted)))
    }

    /// Start times within business hours, at the configured step, at which an
    /// appointment of `duration_minutes` would not overlap an active booking.
    /// Ascending.
    #[instrument(skip(self))]
    pub async fn get_available_time_slots(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<NaiveTime>, ServiceError> {
        validate_duration(duration_minutes)?;
        let booked: Vec<TimeInterval> = self
            .repo
            .list_active_on(date)
            .await?
            .iter()
            .map(ServiceAppointment::interval)
            .collect();

        let mut slots = Vec::new();
        let mut start = self.hours_start;
        while start < self.hours_end {
            let candidate = TimeInterval::new(date, start, duration_minutes);
            if !booked.iter().any(|b| b.overlaps(&candidate)) {
                slots.push(start);
            }
            let (next, wrapped) = start.overflowing_add_signed(self.step);
            if wrapped != 0 {
                break;
            }
            start = next;
        }
        Ok(slots)
    }

    async fn load(&self, id: &str) -> Result<ServiceAppointment, ServiceError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Appointment"))
    }

    /// Books a slot for the caller.
    ///
    /// # Errors
    /// [`ServiceError::SlotUnavailable`] if it overlaps an active booking.
    #[instrument(skip(self, identity, request), fields(user_id = %identity.user_id, date = %request.date))]
    pub async fn book(&self, identity: &Identity, request: BookAppointment) -> Result<ServiceAppointment, ServiceError> {
        validate_duration(request.duration_minutes)?;
        if request.price < Decimal::ZERO {
            return Err(ServiceError::Validation("price must not be negative".into()));
        }
        let now = Utc::now();
        let appointment = ServiceAppointment {
            id: model::new_id(),
            user_id: identity.user_id.clone(),
            service: request.service,
            service_type: request.service_type,
            date: request.date,
            time: request.time,
            duration_minutes: request.duration_minutes,
            status: AppointmentStatus::Scheduled,
            notes: request.notes,
            price: request.price,
            vehicle: request.vehicle,
            location_id: request.location_id,
            payment_method_id: request.payment_method_id,
            created_at: now,
            updated_at: now,
        };

        if !self.repo.insert_if_available(&appointment).await? {
            return Err(ServiceError::SlotUnavailable);
        }
        info!(appointment_id = %appointment.id, time = %clock::format(&appointment.time), "Appointment booked");
        self.notify(identity, &appointment, "Appointment booked", "is booked").await;
        Ok(appointment)
    }

    /// Applies `changes` to an active appointment of the caller. A new date,
    /// time or duration is re-checked for availability, ignoring the
    /// appointment's own current slot.
    #[instrument(skip(self, identity, changes), fields(user_id = %identity.user_id))]
    pub async fn update(
        &self,
        identity: &Identity,
        id: &str,
        changes: AppointmentChanges,
    ) -> Result<ServiceAppointment, ServiceError> {
        let next = self
            .rewrite(id, |current| {
                if !identity.can_access(&current.user_id) {
                    return Err(ServiceError::Unauthorized);
                }
                if !matches!(current.status, AppointmentStatus::Scheduled | AppointmentStatus::InProgress) {
                    return Err(ServiceError::Validation(format!(
                        "a {} appointment cannot be modified",
                        current.status
                    )));
                }
                let next = changes.apply(current);
                validate_duration(next.duration_minutes)?;
                Ok(next)
            })
            .await?;

        self.notify(identity, &next, "Appointment updated", "has been updated").await;
        Ok(next)
    }

    /// Cancels a scheduled or in-progress appointment of the caller.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn cancel(&self, identity: &Identity, id: &str) -> Result<ServiceAppointment, ServiceError> {
        let appointment = self
            .rewrite(id, |current| {
                if !identity.can_access(&current.user_id) {
                    return Err(ServiceError::Unauthorized);
                }
                check_appointment_transition(current.status, AppointmentStatus::Cancelled)?;
                let mut next = current.clone();
                next.status = AppointmentStatus::Cancelled;
                Ok(next)
            })
            .await?;
        self.notify(identity, &appointment, "Appointment cancelled", "has been cancelled").await;
        Ok(appointment)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn get(&self, identity: &Identity, id: &str) -> Result<ServiceAppointment, ServiceError> {
        let appointment = self.load(id).await?;
        if !identity.can_access(&appointment.user_id) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(appointment)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list_mine(&self, identity: &Identity) -> Result<Vec<ServiceAppointment>, ServiceError> {
        Ok(self.repo.list_by_user(&identity.user_id).await?)
    }

    /// Admin-only progress update.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn set_status(
        &self,
        identity: &Identity,
        id: &str,
        status: AppointmentStatus,
    ) -> Result<ServiceAppointment, ServiceError> {
        if !identity.is_admin() {
            return Err(ServiceError::Unauthorized);
        }
        let appointment = self
            .rewrite(id, |current| {
                check_appointment_transition(current.status, status)?;
                let mut next = current.clone();
                next.status = status;
                Ok(next)
            })
            .await?;
        info!(appointment_id = id, status = %status, "Appointment status changed");
        let message = format!("is now {status}");
        self.notify(identity, &appointment, "Appointment status updated", &message).await;
        Ok(appointment)
    }

    /// Reads the appointment, lets `change` derive its next state and writes
    /// it back conditionally on the status that was read. A concurrent status
    /// change forces a re-read, so `change` always judges the latest state.
    async fn rewrite<F>(&self, id: &str, change: F) -> Result<ServiceAppointment, ServiceError>
    where
        F: Fn(&ServiceAppointment) -> Result<ServiceAppointment, ServiceError> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.load(id).await?;
            let mut next = change(&current)?;
            next.updated_at = Utc::now();

            let written = if next.interval() != current.interval() {
                self.repo.update_if_available(&next, current.status).await
            } else {
                self.repo.update(&next, current.status).await.map(|()| true)
            };
            match written {
                Ok(true) => return Ok(next),
                Ok(false) => return Err(ServiceError::SlotUnavailable),
                Err(RepositoryError::Conflict) => debug!(attempt, "Appointment changed concurrently, retrying"),
                Err(RepositoryError::NotFound) => return Err(ServiceError::not_found("Appointment")),
                Err(e) => return Err(e.into()),
            }
        }
        warn!(appointment_id = id, "Giving up on appointment write after {} attempts", MAX_WRITE_ATTEMPTS);
        Err(ServiceError::Contention)
    }

    async fn notify(&self, actor: &Identity, appointment: &ServiceAppointment, title: &str, what: &str) {
        let email = if actor.owns(&appointment.user_id) { actor.email.as_deref() } else { None };
        let message = format!(
            "Your {} appointment on {} at {} {}",
            appointment.service,
            appointment.date,
            clock::format(&appointment.time),
            what
        );
        let notice = Notice::new(NotificationKind::Appointment, title, message).related_to(appointment.id.clone());
        self.notifier.notify(&appointment.user_id, email, notice).await;
    }
}
