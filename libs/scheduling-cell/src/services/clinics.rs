use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{BookingError, Clinic};

pub struct ClinicDirectoryService {
    supabase: Arc<SupabaseClient>,
}

impl ClinicDirectoryService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn get_clinic(&self, clinic_id: Uuid, auth_token: &str) -> Result<Clinic, BookingError> {
        let path = format!("/rest/v1/clinics?id=eq.{}", clinic_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(BookingError::ClinicNotFound)?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse clinic: {}", e)))
    }

    /// Fetch a clinic and require it to be accepting appointments.
    pub async fn get_active_clinic(
        &self,
        clinic_id: Uuid,
        auth_token: &str,
    ) -> Result<Clinic, BookingError> {
        let clinic = self.get_clinic(clinic_id, auth_token).await?;
        if !clinic.is_active {
            return Err(BookingError::ClinicInactive);
        }
        Ok(clinic)
    }

    /// The clinic owned by a CLINIC-role user, if they have one.
    pub async fn get_clinic_by_owner(
        &self,
        owner_id: &str,
        auth_token: &str,
    ) -> Result<Option<Clinic>, BookingError> {
        debug!("Looking up clinic owned by {}", owner_id);

        let path = format!("/rest/v1/clinics?owner_id=eq.{}", owner_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| BookingError::DatabaseError(format!("Failed to parse clinic: {}", e))),
            None => Ok(None),
        }
    }
}
