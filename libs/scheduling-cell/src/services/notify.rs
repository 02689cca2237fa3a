use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_database::supabase::SupabaseClient;

pub struct NotificationService {
    supabase: Arc<SupabaseClient>,
}

impl NotificationService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Record an in-app notification. Best effort: a failure is logged and
    /// never fails the booking operation that triggered it.
    pub async fn notify(&self, user_id: &str, title: &str, message: &str, auth_token: &str) {
        let notification = json!({
            "user_id": user_id,
            "title": title,
            "message": message,
            "is_read": false,
        });

        match self
            .supabase
            .request::<Value>(
                Method::POST,
                "/rest/v1/notifications",
                Some(auth_token),
                Some(notification),
            )
            .await
        {
            Ok(_) => debug!("Notification '{}' recorded for user {}", title, user_id),
            Err(e) => warn!("Failed to record notification for user {}: {}", user_id, e),
        }
    }
}
