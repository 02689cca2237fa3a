use std::sync::Arc;

use chrono::{Duration, NaiveTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{error_status, SupabaseClient};
use shared_models::auth::User;

use crate::models::{
    BookingError, BookingRules, CreateTimeSlotRequest, DayOfWeek, TimeSlotTemplate,
};
use crate::services::access;
use crate::services::clinics::ClinicDirectoryService;
use crate::services::locks::SlotLockService;

const TIME_FORMAT: &str = "%H:%M:%S";
const MAX_LOCK_ATTEMPTS: u32 = 3;

/// Manages the recurring weekly slot templates that define a clinic's
/// bookable schedule.
pub struct TemplateService {
    supabase: Arc<SupabaseClient>,
    clinics: ClinicDirectoryService,
    locks: SlotLockService,
    rules: BookingRules,
}

impl TemplateService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            clinics: ClinicDirectoryService::new(supabase.clone()),
            locks: SlotLockService::new(supabase.clone()),
            supabase,
            rules: BookingRules::default(),
        }
    }

    /// Add a weekly slot template to a clinic's schedule. The per-day lock
    /// keeps concurrent creations from racing on the duplicate check and the
    /// slot index.
    pub async fn create_time_slot(
        &self,
        user: &User,
        request: CreateTimeSlotRequest,
        auth_token: &str,
    ) -> Result<TimeSlotTemplate, BookingError> {
        debug!(
            "Creating time slot for clinic {} on {}",
            request.clinic_id, request.day_of_week
        );

        let clinic = self.clinics.get_clinic(request.clinic_id, auth_token).await?;
        if !clinic.is_active {
            return Err(BookingError::ClinicInactive);
        }
        if !access::can_manage_clinic(user, &clinic) {
            return Err(BookingError::Forbidden);
        }

        if request.start_time >= request.end_time {
            return Err(BookingError::InvalidInterval(
                "start time must be before end time".to_string(),
            ));
        }
        if request.end_time - request.start_time < Duration::minutes(self.rules.min_slot_minutes) {
            return Err(BookingError::InvalidInterval(format!(
                "time slot must be at least {} minutes long",
                self.rules.min_slot_minutes
            )));
        }

        let lock_key = SlotLockService::template_lock_key(request.clinic_id, request.day_of_week);

        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            if !self.locks.acquire(&lock_key, request.clinic_id).await? {
                warn!(
                    "Template lock busy for clinic {}, attempt {}/{}",
                    request.clinic_id, attempt, MAX_LOCK_ATTEMPTS
                );
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                continue;
            }

            let result = self.insert_template(&request, auth_token).await;
            // Release is best-effort; a leaked row expires and the sweeper
            // removes it.
            if let Err(e) = self.locks.release(&lock_key).await {
                warn!("Failed to release schedule lock {}: {}", lock_key, e);
            }
            return result;
        }

        Err(BookingError::DatabaseError(
            "Failed to acquire schedule lock after multiple attempts".to_string(),
        ))
    }

    async fn insert_template(
        &self,
        request: &CreateTimeSlotRequest,
        auth_token: &str,
    ) -> Result<TimeSlotTemplate, BookingError> {
        if self
            .duplicate_exists(
                request.clinic_id,
                request.day_of_week,
                request.start_time,
                auth_token,
            )
            .await?
        {
            return Err(BookingError::DuplicateTemplate);
        }

        let slot_index = self
            .next_slot_index(request.clinic_id, request.day_of_week, auth_token)
            .await?;

        let slot_data = json!({
            "id": Uuid::new_v4(),
            "clinic_id": request.clinic_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format(TIME_FORMAT).to_string(),
            "end_time": request.end_time.format(TIME_FORMAT).to_string(),
            "slot_index": slot_index,
            "is_active": true,
            "created_at": Utc::now().to_rfc3339()
        });

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/time_slots",
                Some(auth_token),
                Some(slot_data),
                Some(headers),
            )
            .await
            .map_err(|e| {
                // A unique violation under the lock means a concurrent insert won.
                if error_status(&e) == Some(StatusCode::CONFLICT) {
                    BookingError::DuplicateTemplate
                } else {
                    BookingError::DatabaseError(e.to_string())
                }
            })?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| BookingError::DatabaseError("Time slot creation returned no row".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse time slot: {}", e)))
    }

    /// Uniqueness is on (clinic, day, start): two active templates may not
    /// start at the same wall-clock time even if they end differently.
    async fn duplicate_exists(
        &self,
        clinic_id: Uuid,
        day: DayOfWeek,
        start_time: NaiveTime,
        auth_token: &str,
    ) -> Result<bool, BookingError> {
        let path = format!(
            "/rest/v1/time_slots?clinic_id=eq.{}&day_of_week=eq.{}&start_time=eq.{}&is_active=eq.true",
            clinic_id,
            day,
            start_time.format(TIME_FORMAT)
        );

        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Ok(!existing.is_empty())
    }

    async fn next_slot_index(
        &self,
        clinic_id: Uuid,
        day: DayOfWeek,
        auth_token: &str,
    ) -> Result<i32, BookingError> {
        let path = format!(
            "/rest/v1/time_slots?clinic_id=eq.{}&day_of_week=eq.{}&select=slot_index&order=slot_index.desc&limit=1",
            clinic_id, day
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let max_index = result
            .first()
            .and_then(|row| row.get("slot_index"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as i32;

        Ok(max_index + 1)
    }

    /// Exact-match lookup used to validate a booking against the schedule.
    pub async fn find_matching_slot(
        &self,
        clinic_id: Uuid,
        day: DayOfWeek,
        start_time: NaiveTime,
        end_time: NaiveTime,
        auth_token: &str,
    ) -> Result<TimeSlotTemplate, BookingError> {
        let path = format!(
            "/rest/v1/time_slots?clinic_id=eq.{}&day_of_week=eq.{}&start_time=eq.{}&end_time=eq.{}&is_active=eq.true",
            clinic_id,
            day,
            start_time.format(TIME_FORMAT),
            end_time.format(TIME_FORMAT)
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(BookingError::InvalidSlot)?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse time slot: {}", e)))
    }

    pub async fn list_clinic_slots(
        &self,
        clinic_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<TimeSlotTemplate>, BookingError> {
        let path = format!(
            "/rest/v1/time_slots?clinic_id=eq.{}&is_active=eq.true&order=day_of_week.asc,slot_index.asc",
            clinic_id
        );

        self.fetch_slots(&path, auth_token).await
    }

    pub async fn list_active_slots_for_day(
        &self,
        clinic_id: Uuid,
        day: DayOfWeek,
        auth_token: &str,
    ) -> Result<Vec<TimeSlotTemplate>, BookingError> {
        let path = format!(
            "/rest/v1/time_slots?clinic_id=eq.{}&day_of_week=eq.{}&is_active=eq.true&order=start_time.asc",
            clinic_id, day
        );

        self.fetch_slots(&path, auth_token).await
    }

    /// Retire a template. Soft delete so historical bookings keep their
    /// schedule context.
    pub async fn deactivate_slot(
        &self,
        user: &User,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let path = format!("/rest/v1/time_slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(BookingError::SlotNotFound)?;
        let slot: TimeSlotTemplate = serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse time slot: {}", e)))?;

        let clinic = self.clinics.get_clinic(slot.clinic_id, auth_token).await?;
        if !access::can_manage_clinic(user, &clinic) {
            return Err(BookingError::Forbidden);
        }

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/time_slots?id=eq.{}", slot_id),
                Some(auth_token),
                Some(json!({ "is_active": false })),
                Some(headers),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        debug!("Time slot {} deactivated", slot_id);
        Ok(())
    }

    async fn fetch_slots(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<Vec<TimeSlotTemplate>, BookingError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<TimeSlotTemplate>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse time slots: {}", e)))
    }
}
