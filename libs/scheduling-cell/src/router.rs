// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn scheduling_routes(state: Arc<AppConfig>) -> Router {
    // Every scheduling operation requires authentication
    let protected_routes = Router::new()
        // Slot template management
        .route("/slots", post(handlers::create_time_slot))
        .route("/slots/{id}", delete(handlers::delete_time_slot))
        .route("/slots/{id}/available", get(handlers::get_available_slots))
        .route("/slots/clinic/{id}", get(handlers::get_clinic_slots))
        // Booking lifecycle
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/my", get(handlers::get_my_bookings))
        .route("/bookings/{booking_id}", get(handlers::get_booking))
        .route("/bookings/{booking_id}/cancel", post(handlers::cancel_booking))
        .route(
            "/bookings/{booking_id}/reschedule",
            post(handlers::reschedule_booking),
        )
        // Clinic views
        .route("/clinic/{clinic_id}", get(handlers::get_clinic_bookings))
        // Statistics
        .route("/stats/clinic", get(handlers::get_clinic_stats))
        .route("/stats/admin", get(handlers::get_admin_stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
