// libs/scheduling-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serde codec for wall-clock times stored as "HH:MM" (PostgREST may also
/// return "HH:MM:SS").
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&s, FORMAT))
            .map_err(serde::de::Error::custom)
    }
}

// ==============================================================================
// TIME SLOT TEMPLATE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "MONDAY",
            DayOfWeek::Tuesday => "TUESDAY",
            DayOfWeek::Wednesday => "WEDNESDAY",
            DayOfWeek::Thursday => "THURSDAY",
            DayOfWeek::Friday => "FRIDAY",
            DayOfWeek::Saturday => "SATURDAY",
            DayOfWeek::Sunday => "SUNDAY",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recurring weekly slot in a clinic's schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlotTemplate {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub day_of_week: DayOfWeek,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub slot_index: i32,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimeSlotRequest {
    pub clinic_id: Uuid,
    pub day_of_week: DayOfWeek,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

/// A slot template projected onto a concrete date, with booking state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub slot_id: Uuid,
    pub date: NaiveDate,
    pub day_of_week: DayOfWeek,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub slot_index: i32,
    pub is_booked: bool,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
}

// ==============================================================================
// BOOKING MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Rescheduled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Rescheduled => "RESCHEDULED",
        }
    }

    /// Whether a booking in this status still occupies its time slot.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Rescheduled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Timestamps carry an explicit UTC offset; naive values fail to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub clinic_id: Uuid,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleBookingRequest {
    pub new_start_time: DateTime<FixedOffset>,
    pub new_end_time: DateTime<FixedOffset>,
}

/// Optional filters for booking listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingListQuery {
    pub status: Option<BookingStatus>,
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
    /// Active bookings that have not started yet.
    #[serde(default)]
    pub upcoming: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// ==============================================================================
// CLINIC AND STATS MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
    pub id: Uuid,
    pub owner_id: String,
    pub name: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentStats {
    pub total_bookings: i32,
    pub confirmed: i32,
    pub cancelled: i32,
    pub rescheduled: i32,
    pub upcoming: i32,
}

#[derive(Debug, Deserialize)]
pub struct AdminStatsQuery {
    pub clinic_id: Option<Uuid>,
}

// ==============================================================================
// BOOKING RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BookingRules {
    /// Minimum gap between "now" and a new booking's start.
    pub min_lead_minutes: i64,
    /// A booking can no longer be rescheduled this close to its start.
    pub reschedule_cutoff_minutes: i64,
    /// Minimum template length.
    pub min_slot_minutes: i64,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_lead_minutes: 10,
            reschedule_cutoff_minutes: 30,
            min_slot_minutes: 10,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Booking not found")]
    NotFound,

    #[error("Time slot not found")]
    SlotNotFound,

    #[error("Clinic not found")]
    ClinicNotFound,

    #[error("Clinic is not active")]
    ClinicInactive,

    #[error("Invalid time interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid time slot for the selected date")]
    InvalidSlot,

    #[error("Slot is already booked")]
    SlotTaken,

    #[error("An identical time slot already exists for this day")]
    DuplicateTemplate,

    #[error("Not authorized to access this booking")]
    Forbidden,

    #[error("Bookings must be made at least {0} minutes in advance")]
    TooEarly(i64),

    #[error("Too late to reschedule this booking")]
    TooLate,

    #[error("Booking is already cancelled")]
    AlreadyCancelled,

    #[error("Only confirmed bookings can be rescheduled")]
    NotReschedulable,

    #[error("Database error: {0}")]
    DatabaseError(String),
}
