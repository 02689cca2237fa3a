use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Booking, BookingError};

/// Half-open interval overlap: [start1, end1) intersects [start2, end2).
/// Back-to-back bookings sharing a boundary do not conflict.
pub fn intervals_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Check whether an active booking already occupies any part of the
    /// requested interval at this clinic.
    pub async fn has_conflict(
        &self,
        clinic_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_booking_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<bool, BookingError> {
        debug!(
            "Checking conflicts for clinic {} from {} to {}",
            clinic_id, start_time, end_time
        );

        let existing = self
            .get_active_bookings_in_range(
                clinic_id,
                start_time,
                end_time,
                exclude_booking_id,
                auth_token,
            )
            .await?;

        let conflict = existing
            .iter()
            .any(|booking| intervals_overlap(start_time, end_time, booking.start_time, booking.end_time));

        if conflict {
            warn!("Conflict detected for clinic {} at {}", clinic_id, start_time);
        }

        Ok(conflict)
    }

    /// Active (CONFIRMED or RESCHEDULED) bookings of a clinic whose stored
    /// interval touches the given range. The server-side range filter is a
    /// coarse cut; [`intervals_overlap`] is the authoritative predicate.
    pub async fn get_active_bookings_in_range(
        &self,
        clinic_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_booking_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        let mut query_parts = vec![
            format!("clinic_id=eq.{}", clinic_id),
            "status=in.(CONFIRMED,RESCHEDULED)".to_string(),
            format!("start_time=lt.{}", urlencoding::encode(&end_time.to_rfc3339())),
            format!("end_time=gt.{}", urlencoding::encode(&start_time.to_rfc3339())),
        ];

        if let Some(exclude_id) = exclude_booking_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/bookings?{}&order=start_time.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Booking>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse bookings: {}", e)))
    }
}
