use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{error_status, SupabaseClient};
use shared_models::auth::{User, UserRole};

use crate::models::{
    Booking, BookingError, BookingListQuery, BookingRules, BookingStatus, CreateBookingRequest,
    DayOfWeek, RescheduleBookingRequest, TimeSlotTemplate,
};
use crate::services::access;
use crate::services::clinics::ClinicDirectoryService;
use crate::services::clock::{Clock, SystemClock};
use crate::services::conflict::ConflictDetectionService;
use crate::services::locks::SlotLockService;
use crate::services::notify::NotificationService;
use crate::services::slots::TemplateService;

const MAX_LOCK_ATTEMPTS: u32 = 3;

fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

/// Booking lifecycle: create, cancel, reschedule, and the read paths.
pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    conflicts: ConflictDetectionService,
    templates: TemplateService,
    clinics: ClinicDirectoryService,
    notifications: NotificationService,
    locks: SlotLockService,
    rules: BookingRules,
    clock: Arc<dyn Clock>,
    tz: FixedOffset,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            conflicts: ConflictDetectionService::new(supabase.clone()),
            templates: TemplateService::new(config),
            clinics: ClinicDirectoryService::new(supabase.clone()),
            notifications: NotificationService::new(supabase.clone()),
            locks: SlotLockService::new(supabase.clone()),
            supabase,
            rules: BookingRules::default(),
            clock,
            tz: config.clinic_tz(),
        }
    }

    /// Book a slot. The requested interval must match one of the clinic's
    /// slot templates exactly (in clinic-local time), respect the lead-time
    /// rule, and be free of conflicts. Insertion happens under an advisory
    /// lock on the interval.
    pub async fn create_booking(
        &self,
        user: &User,
        request: CreateBookingRequest,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let now = self.clock.now();
        let start_time = request.start_time.with_timezone(&Utc);
        let end_time = request.end_time.with_timezone(&Utc);

        if start_time >= end_time {
            return Err(BookingError::InvalidInterval(
                "start time must be before end time".to_string(),
            ));
        }
        if start_time <= now {
            return Err(BookingError::InvalidInterval(
                "start time must be in the future".to_string(),
            ));
        }
        if start_time <= now + Duration::minutes(self.rules.min_lead_minutes) {
            return Err(BookingError::TooEarly(self.rules.min_lead_minutes));
        }

        let clinic = self
            .clinics
            .get_active_clinic(request.clinic_id, auth_token)
            .await?;

        self.match_schedule(request.clinic_id, start_time, end_time, auth_token)
            .await?;

        let lock_key = SlotLockService::booking_lock_key(request.clinic_id, start_time, end_time);

        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            if !self.locks.acquire(&lock_key, request.clinic_id).await? {
                warn!(
                    "Booking lock busy for clinic {}, attempt {}/{}",
                    request.clinic_id, attempt, MAX_LOCK_ATTEMPTS
                );
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                continue;
            }

            let outcome = self
                .conflict_checked_insert(request.clinic_id, &user.id, start_time, end_time, auth_token)
                .await;
            // Release is best-effort; a leaked row expires and the sweeper
            // removes it. The insert outcome must not be masked.
            if let Err(e) = self.locks.release(&lock_key).await {
                warn!("Failed to release booking lock {}: {}", lock_key, e);
            }
            let booking = outcome?;

            info!(
                "Booking {} created for clinic {} at {}",
                booking.id, booking.clinic_id, booking.start_time
            );

            let message = format!(
                "Your appointment at {} on {} is confirmed",
                clinic.name.as_deref().unwrap_or("the clinic"),
                start_time.with_timezone(&self.tz).format("%Y-%m-%d %H:%M")
            );
            self.notifications
                .notify(&user.id, "Booking Confirmed", &message, auth_token)
                .await;

            return Ok(booking);
        }

        Err(BookingError::DatabaseError(
            "Failed to acquire booking lock after multiple attempts".to_string(),
        ))
    }

    pub async fn cancel_booking(
        &self,
        user: &User,
        booking_id: Uuid,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let booking = self.get_booking(booking_id, auth_token).await?;
        self.authorize(user, &booking, auth_token).await?;

        if booking.status == BookingStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled);
        }

        let updated = self
            .update_booking(
                booking_id,
                json!({
                    "status": BookingStatus::Cancelled,
                    "updated_at": self.clock.now().to_rfc3339()
                }),
                auth_token,
            )
            .await?;

        info!("Booking {} cancelled", booking_id);

        let message = format!(
            "Your appointment on {} has been cancelled",
            booking.start_time.with_timezone(&self.tz).format("%Y-%m-%d %H:%M")
        );
        self.notifications
            .notify(&booking.user_id, "Booking Cancelled", &message, auth_token)
            .await;

        Ok(updated)
    }

    /// Move a confirmed booking to a new interval. The cutoff rule applies
    /// to the booking's current start, the new interval must match a slot
    /// template, and the conflict check excludes the booking itself.
    pub async fn reschedule_booking(
        &self,
        user: &User,
        booking_id: Uuid,
        request: RescheduleBookingRequest,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let now = self.clock.now();
        let new_start = request.new_start_time.with_timezone(&Utc);
        let new_end = request.new_end_time.with_timezone(&Utc);

        if new_start >= new_end {
            return Err(BookingError::InvalidInterval(
                "start time must be before end time".to_string(),
            ));
        }
        if new_start <= now {
            return Err(BookingError::InvalidInterval(
                "new start time must be in the future".to_string(),
            ));
        }

        let booking = self.get_booking(booking_id, auth_token).await?;
        self.authorize(user, &booking, auth_token).await?;

        if booking.status != BookingStatus::Confirmed {
            return Err(BookingError::NotReschedulable);
        }
        if booking.start_time <= now + Duration::minutes(self.rules.reschedule_cutoff_minutes) {
            return Err(BookingError::TooLate);
        }

        self.match_schedule(booking.clinic_id, new_start, new_end, auth_token)
            .await?;

        let lock_key = SlotLockService::booking_lock_key(booking.clinic_id, new_start, new_end);

        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            if !self.locks.acquire(&lock_key, booking.clinic_id).await? {
                warn!(
                    "Reschedule lock busy for booking {}, attempt {}/{}",
                    booking_id, attempt, MAX_LOCK_ATTEMPTS
                );
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                continue;
            }

            let outcome = self
                .conflict_checked_move(&booking, new_start, new_end, auth_token)
                .await;
            if let Err(e) = self.locks.release(&lock_key).await {
                warn!("Failed to release booking lock {}: {}", lock_key, e);
            }
            let updated = outcome?;

            info!("Booking {} rescheduled to {}", booking_id, new_start);

            let message = format!(
                "Your appointment has been moved to {}",
                new_start.with_timezone(&self.tz).format("%Y-%m-%d %H:%M")
            );
            self.notifications
                .notify(&booking.user_id, "Booking Rescheduled", &message, auth_token)
                .await;

            return Ok(updated);
        }

        Err(BookingError::DatabaseError(
            "Failed to acquire booking lock after multiple attempts".to_string(),
        ))
    }

    pub async fn get_booking(&self, booking_id: Uuid, auth_token: &str) -> Result<Booking, BookingError> {
        let path = format!("/rest/v1/bookings?id=eq.{}", booking_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(BookingError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse booking: {}", e)))
    }

    /// Fetch a booking and enforce the caller's access to it.
    pub async fn get_booking_for_user(
        &self,
        user: &User,
        booking_id: Uuid,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let booking = self.get_booking(booking_id, auth_token).await?;
        self.authorize(user, &booking, auth_token).await?;
        Ok(booking)
    }

    pub async fn list_my_bookings(
        &self,
        user: &User,
        query: &BookingListQuery,
        auth_token: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        let mut parts = vec![format!("user_id=eq.{}", user.id)];
        parts.extend(self.booking_filters(query));
        parts.push("order=start_time.desc".to_string());

        let path = format!("/rest/v1/bookings?{}", parts.join("&"));
        self.fetch_bookings(&path, auth_token).await
    }

    pub async fn list_clinic_bookings(
        &self,
        user: &User,
        clinic_id: Uuid,
        query: &BookingListQuery,
        auth_token: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        let clinic = self.clinics.get_clinic(clinic_id, auth_token).await?;
        if !access::can_view_clinic_bookings(user, &clinic) {
            return Err(BookingError::Forbidden);
        }

        let mut parts = vec![format!("clinic_id=eq.{}", clinic_id)];
        parts.extend(self.booking_filters(query));
        parts.push("order=start_time.desc".to_string());

        let path = format!("/rest/v1/bookings?{}", parts.join("&"));
        self.fetch_bookings(&path, auth_token).await
    }

    // ==========================================================================
    // INTERNALS
    // ==========================================================================

    /// Translate listing filters into PostgREST query parts.
    fn booking_filters(&self, query: &BookingListQuery) -> Vec<String> {
        let mut parts = Vec::new();

        if let Some(status) = query.status {
            parts.push(format!("status=eq.{}", status));
        }
        if query.upcoming {
            parts.push("status=in.(CONFIRMED,RESCHEDULED)".to_string());
            parts.push(format!(
                "start_time=gt.{}",
                urlencoding::encode(&self.clock.now().to_rfc3339())
            ));
        }
        if let Some(from) = query.from {
            parts.push(format!(
                "start_time=gte.{}",
                urlencoding::encode(&from.to_rfc3339())
            ));
        }
        if let Some(to) = query.to {
            parts.push(format!(
                "start_time=lt.{}",
                urlencoding::encode(&to.to_rfc3339())
            ));
        }
        if let Some(limit) = query.limit {
            parts.push(format!("limit={}", limit));
        }
        if let Some(offset) = query.offset {
            parts.push(format!("offset={}", offset));
        }

        parts
    }

    async fn authorize(
        &self,
        user: &User,
        booking: &Booking,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let owned_clinic = match user.user_role() {
            Some(UserRole::Clinic) => {
                self.clinics.get_clinic_by_owner(&user.id, auth_token).await?
            }
            _ => None,
        };

        if access::can_access_booking(user, booking, owned_clinic.as_ref()) {
            Ok(())
        } else {
            Err(BookingError::Forbidden)
        }
    }

    /// Validate a UTC interval against the clinic's weekly schedule. Both
    /// endpoints must land on the same clinic-local day and match a template
    /// exactly.
    async fn match_schedule(
        &self,
        clinic_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<TimeSlotTemplate, BookingError> {
        let local_start = start_time.with_timezone(&self.tz);
        let local_end = end_time.with_timezone(&self.tz);

        if local_start.date_naive() != local_end.date_naive() {
            return Err(BookingError::InvalidSlot);
        }

        let day = DayOfWeek::from_weekday(local_start.weekday());
        self.templates
            .find_matching_slot(clinic_id, day, local_start.time(), local_end.time(), auth_token)
            .await
    }

    async fn conflict_checked_insert(
        &self,
        clinic_id: Uuid,
        user_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        if self
            .conflicts
            .has_conflict(clinic_id, start_time, end_time, None, auth_token)
            .await?
        {
            return Err(BookingError::SlotTaken);
        }

        let now = self.clock.now();
        let booking_data = json!({
            "id": Uuid::new_v4(),
            "clinic_id": clinic_id,
            "user_id": user_id,
            "start_time": start_time.to_rfc3339(),
            "end_time": end_time.to_rfc3339(),
            "status": BookingStatus::Confirmed,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        debug!("Inserting booking for clinic {} at {}", clinic_id, start_time);

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/bookings",
                Some(auth_token),
                Some(booking_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| {
                // An exclusion constraint rejecting the insert is a conflict
                // that slipped past the pre-check.
                if error_status(&e) == Some(StatusCode::CONFLICT) {
                    BookingError::SlotTaken
                } else {
                    BookingError::DatabaseError(e.to_string())
                }
            })?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| BookingError::DatabaseError("Booking creation returned no row".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse booking: {}", e)))
    }

    async fn conflict_checked_move(
        &self,
        booking: &Booking,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        if self
            .conflicts
            .has_conflict(booking.clinic_id, new_start, new_end, Some(booking.id), auth_token)
            .await?
        {
            return Err(BookingError::SlotTaken);
        }

        self.update_booking(
            booking.id,
            json!({
                "start_time": new_start.to_rfc3339(),
                "end_time": new_end.to_rfc3339(),
                "status": BookingStatus::Rescheduled,
                "updated_at": self.clock.now().to_rfc3339()
            }),
            auth_token,
        )
        .await
    }

    async fn update_booking(
        &self,
        booking_id: Uuid,
        patch: Value,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/bookings?id=eq.{}", booking_id),
                Some(auth_token),
                Some(patch),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(BookingError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse booking: {}", e)))
    }

    async fn fetch_bookings(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Booking>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse bookings: {}", e)))
    }
}
