use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{AppointmentStats, Booking, BookingError, BookingStatus};
use crate::services::clinics::ClinicDirectoryService;
use crate::services::clock::{Clock, SystemClock};

pub struct StatsService {
    supabase: Arc<SupabaseClient>,
    clinics: ClinicDirectoryService,
    clock: Arc<dyn Clock>,
}

impl StatsService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            clinics: ClinicDirectoryService::new(supabase.clone()),
            supabase,
            clock,
        }
    }

    /// Stats scoped to the clinic the calling staff user owns.
    pub async fn clinic_stats(
        &self,
        user: &User,
        auth_token: &str,
    ) -> Result<AppointmentStats, BookingError> {
        let clinic = self
            .clinics
            .get_clinic_by_owner(&user.id, auth_token)
            .await?
            .ok_or(BookingError::Forbidden)?;

        self.compute(Some(clinic.id), auth_token).await
    }

    /// System-wide stats, optionally narrowed to one clinic.
    pub async fn admin_stats(
        &self,
        clinic_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<AppointmentStats, BookingError> {
        self.compute(clinic_id, auth_token).await
    }

    async fn compute(
        &self,
        clinic_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<AppointmentStats, BookingError> {
        let path = match clinic_id {
            Some(id) => format!("/rest/v1/bookings?clinic_id=eq.{}&select=*", id),
            None => "/rest/v1/bookings?select=*".to_string(),
        };

        debug!("Computing booking stats ({})", path);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let bookings: Vec<Booking> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Booking>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse bookings: {}", e)))?;

        let now = self.clock.now();
        let mut stats = AppointmentStats {
            total_bookings: bookings.len() as i32,
            confirmed: 0,
            cancelled: 0,
            rescheduled: 0,
            upcoming: 0,
        };

        for booking in &bookings {
            match booking.status {
                BookingStatus::Confirmed => stats.confirmed += 1,
                BookingStatus::Cancelled => stats.cancelled += 1,
                BookingStatus::Rescheduled => stats.rescheduled += 1,
            }
            if booking.status.is_active() && booking.start_time > now {
                stats.upcoming += 1;
            }
        }

        Ok(stats)
    }
}
