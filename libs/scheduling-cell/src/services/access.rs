use shared_models::auth::{User, UserRole};

use crate::models::{Booking, Clinic};

/// Whether `user` may view or act on `booking`. Clinic staff need the clinic
/// they own passed in; other roles are decided from the booking alone.
pub fn can_access_booking(user: &User, booking: &Booking, owned_clinic: Option<&Clinic>) -> bool {
    match user.user_role() {
        Some(UserRole::Admin) => true,
        Some(UserRole::Owner) | Some(UserRole::Welfare) => booking.user_id == user.id,
        Some(UserRole::Clinic) => owned_clinic
            .map(|clinic| clinic.id == booking.clinic_id)
            .unwrap_or(false),
        None => false,
    }
}

/// Whether `user` may create or retire slot templates for `clinic`.
pub fn can_manage_clinic(user: &User, clinic: &Clinic) -> bool {
    match user.user_role() {
        Some(UserRole::Admin) => true,
        Some(UserRole::Clinic) => clinic.owner_id == user.id,
        _ => false,
    }
}

/// Whether `user` may list all bookings of `clinic`.
pub fn can_view_clinic_bookings(user: &User, clinic: &Clinic) -> bool {
    can_manage_clinic(user, clinic)
}
