// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{User, UserRole};
use shared_models::error::AppError;

use crate::models::{
    AdminStatsQuery, AvailabilityQuery, BookingError, BookingListQuery, CreateBookingRequest,
    CreateTimeSlotRequest, RescheduleBookingRequest,
};
use crate::services::availability::AvailabilityService;
use crate::services::booking::BookingService;
use crate::services::slots::TemplateService;
use crate::services::stats::StatsService;

fn map_booking_error(e: BookingError) -> AppError {
    match e {
        BookingError::NotFound
        | BookingError::SlotNotFound
        | BookingError::ClinicNotFound => AppError::NotFound(e.to_string()),
        BookingError::ClinicInactive | BookingError::Forbidden => AppError::Forbidden(e.to_string()),
        BookingError::InvalidInterval(_)
        | BookingError::InvalidSlot
        | BookingError::TooEarly(_)
        | BookingError::TooLate
        | BookingError::AlreadyCancelled
        | BookingError::NotReschedulable => AppError::BadRequest(e.to_string()),
        BookingError::SlotTaken | BookingError::DuplicateTemplate => AppError::Conflict(e.to_string()),
        BookingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// TIME SLOT TEMPLATE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_time_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateTimeSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let token = auth.token();

    let service = TemplateService::new(&state);
    let slot = service
        .create_time_slot(&user, request, token)
        .await
        .map_err(map_booking_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "slot": slot,
            "message": "Time slot created successfully"
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = AvailabilityService::new(&state);
    let slots = service
        .available_slots(clinic_id, query.date, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "clinic_id": clinic_id,
        "date": query.date,
        "slots": slots
    })))
}

#[axum::debug_handler]
pub async fn get_clinic_slots(
    State(state): State<Arc<AppConfig>>,
    Path(clinic_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = TemplateService::new(&state);
    let slots = service
        .list_clinic_slots(clinic_id, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "clinic_id": clinic_id,
        "slots": slots
    })))
}

#[axum::debug_handler]
pub async fn delete_time_slot(
    State(state): State<Arc<AppConfig>>,
    Path(slot_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = TemplateService::new(&state);
    service
        .deactivate_slot(&user, slot_id, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Time slot removed from schedule"
    })))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_booking(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let token = auth.token();

    let service = BookingService::new(&state);
    let booking = service
        .create_booking(&user, request, token)
        .await
        .map_err(map_booking_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "booking": booking,
            "message": "Booking confirmed"
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_my_bookings(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<BookingListQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = BookingService::new(&state);
    let bookings = service
        .list_my_bookings(&user, &query, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "bookings": bookings
    })))
}

#[axum::debug_handler]
pub async fn get_booking(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = BookingService::new(&state);
    let booking = service
        .get_booking_for_user(&user, booking_id, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking": booking
    })))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = BookingService::new(&state);
    let booking = service
        .cancel_booking(&user, booking_id, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking": booking,
        "message": "Booking cancelled"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_booking(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = BookingService::new(&state);
    let booking = service
        .reschedule_booking(&user, booking_id, request, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking": booking,
        "message": "Booking rescheduled"
    })))
}

#[axum::debug_handler]
pub async fn get_clinic_bookings(
    State(state): State<Arc<AppConfig>>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<BookingListQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = BookingService::new(&state);
    let bookings = service
        .list_clinic_bookings(&user, clinic_id, &query, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "clinic_id": clinic_id,
        "bookings": bookings
    })))
}

// ==============================================================================
// STATS HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_clinic_stats(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.user_role() != Some(UserRole::Clinic) {
        return Err(AppError::Forbidden(
            "Clinic statistics are only available to clinic staff".to_string(),
        ));
    }

    let service = StatsService::new(&state);
    let stats = service
        .clinic_stats(&user, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "stats": stats
    })))
}

#[axum::debug_handler]
pub async fn get_admin_stats(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AdminStatsQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.user_role() != Some(UserRole::Admin) {
        return Err(AppError::Forbidden(
            "Admin statistics require the ADMIN role".to_string(),
        ));
    }

    let service = StatsService::new(&state);
    let stats = service
        .admin_stats(query.clinic_id, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "stats": stats
    })))
}
