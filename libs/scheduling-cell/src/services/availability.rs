use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AvailableSlot, BookingError, DayOfWeek};
use crate::services::conflict::{intervals_overlap, ConflictDetectionService};
use crate::services::slots::TemplateService;

/// Project a clinic-local wall-clock time onto a date as a UTC instant.
fn local_instant(date: NaiveDate, time: NaiveTime, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The UTC interval a slot template occupies on a concrete date.
pub fn slot_instants(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    tz: &FixedOffset,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    Some((local_instant(date, start, tz)?, local_instant(date, end, tz)?))
}

/// Resolves a clinic's weekly schedule against existing bookings for a date.
pub struct AvailabilityService {
    templates: TemplateService,
    conflicts: ConflictDetectionService,
    tz: FixedOffset,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            templates: TemplateService::new(config),
            conflicts: ConflictDetectionService::new(supabase),
            tz: config.clinic_tz(),
        }
    }

    /// All of the clinic's slots for the date's weekday, each flagged with
    /// whether an active booking already occupies it.
    pub async fn available_slots(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<AvailableSlot>, BookingError> {
        let day = DayOfWeek::from_weekday(date.weekday());
        debug!("Resolving availability for clinic {} on {} ({})", clinic_id, date, day);

        let templates = self
            .templates
            .list_active_slots_for_day(clinic_id, day, auth_token)
            .await?;

        if templates.is_empty() {
            return Ok(vec![]);
        }

        let day_start = local_instant(date, NaiveTime::MIN, &self.tz)
            .ok_or_else(|| BookingError::InvalidInterval("date out of range".to_string()))?;
        let next_day = date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| BookingError::InvalidInterval("date out of range".to_string()))?;
        let day_end = local_instant(next_day, NaiveTime::MIN, &self.tz)
            .ok_or_else(|| BookingError::InvalidInterval("date out of range".to_string()))?;

        // One fetch for the whole day, then flag slots in memory.
        let bookings = self
            .conflicts
            .get_active_bookings_in_range(clinic_id, day_start, day_end, None, auth_token)
            .await?;

        let mut slots = Vec::with_capacity(templates.len());
        for template in templates {
            let Some((slot_start, slot_end)) =
                slot_instants(date, template.start_time, template.end_time, &self.tz)
            else {
                continue;
            };

            let is_booked = bookings
                .iter()
                .any(|b| intervals_overlap(slot_start, slot_end, b.start_time, b.end_time));

            slots.push(AvailableSlot {
                slot_id: template.id,
                date,
                day_of_week: template.day_of_week,
                start_time: template.start_time,
                end_time: template.end_time,
                slot_index: template.slot_index,
                is_booked,
            });
        }

        debug!("Found {} slots ({} booked) for clinic {} on {}",
               slots.len(),
               slots.iter().filter(|s| s.is_booked).count(),
               clinic_id,
               date);

        Ok(slots)
    }
}
