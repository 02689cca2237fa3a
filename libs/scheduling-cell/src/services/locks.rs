// Distributed advisory locks backed by a scheduling_locks table. A lock is a
// row keyed by lock_key; inserting it again fails, which is the mutual
// exclusion. Expired rows are cleaned up lazily by contenders.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{BookingError, DayOfWeek};

fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

pub struct SlotLockService {
    supabase: Arc<SupabaseClient>,
    lock_timeout_seconds: i64,
}

impl SlotLockService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            lock_timeout_seconds: 30,
        }
    }

    /// Lock key guarding one clinic's interval against concurrent bookings.
    pub fn booking_lock_key(
        clinic_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> String {
        format!(
            "booking_{}_{}_{}",
            clinic_id,
            start_time.timestamp(),
            end_time.timestamp()
        )
    }

    /// Lock key guarding one clinic's weekday schedule during template edits.
    pub fn template_lock_key(clinic_id: Uuid, day: DayOfWeek) -> String {
        format!("slots_{}_{}", clinic_id, day)
    }

    /// Try to take the lock. Returns false when another holder is active.
    pub async fn acquire(&self, lock_key: &str, clinic_id: Uuid) -> Result<bool, BookingError> {
        if self.try_acquire_once(lock_key, clinic_id).await? {
            return Ok(true);
        }

        // Holder exists; if its row has expired, remove it and retry once.
        if self.check_and_cleanup_expired(lock_key).await? {
            return self.try_acquire_once(lock_key, clinic_id).await;
        }

        Ok(false)
    }

    pub async fn release(&self, lock_key: &str) -> Result<(), BookingError> {
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &format!("/rest/v1/scheduling_locks?lock_key=eq.{}", lock_key),
                None,
                None,
                Some(representation_headers()),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(format!("Lock release failed: {}", e)))?;

        debug!("Scheduling lock released: {}", lock_key);
        Ok(())
    }

    async fn try_acquire_once(&self, lock_key: &str, clinic_id: Uuid) -> Result<bool, BookingError> {
        let lock_data = json!({
            "lock_key": lock_key,
            "clinic_id": clinic_id,
            "acquired_at": Utc::now().to_rfc3339(),
            "expires_at": (Utc::now() + Duration::seconds(self.lock_timeout_seconds)).to_rfc3339(),
            "process_id": format!("scheduler_{}", Uuid::new_v4())
        });

        match self
            .supabase
            .request::<Value>(
                Method::POST,
                "/rest/v1/scheduling_locks",
                None,
                Some(lock_data),
            )
            .await
        {
            Ok(_) => {
                debug!("Scheduling lock acquired: {}", lock_key);
                Ok(true)
            }
            // Unique violation means someone else holds the key.
            Err(_) => Ok(false),
        }
    }

    async fn check_and_cleanup_expired(&self, lock_key: &str) -> Result<bool, BookingError> {
        let response: Value = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/scheduling_locks?lock_key=eq.{}&select=*", lock_key),
                None,
                None,
            )
            .await
            .map_err(|e| BookingError::DatabaseError(format!("Lock check failed: {}", e)))?;

        if let Some(lock) = response.as_array().and_then(|locks| locks.first()) {
            if let Some(expires_at_str) = lock.get("expires_at").and_then(|v| v.as_str()) {
                if let Ok(expires_at) = DateTime::parse_from_rfc3339(expires_at_str) {
                    if expires_at.with_timezone(&Utc) < Utc::now() {
                        self.release(lock_key).await?;
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Remove all expired lock rows. Safe to run periodically.
    pub async fn cleanup_expired_locks(&self) -> Result<u32, BookingError> {
        let now = Utc::now();

        let response: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &format!(
                    "/rest/v1/scheduling_locks?expires_at=lt.{}",
                    urlencoding::encode(&now.to_rfc3339())
                ),
                None,
                None,
                Some(representation_headers()),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(format!("Lock cleanup failed: {}", e)))?;

        let cleaned_count = response.len() as u32;

        if cleaned_count > 0 {
            info!("Cleaned up {} expired scheduling locks", cleaned_count);
        }

        Ok(cleaned_count)
    }
}
