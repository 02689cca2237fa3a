pub mod access;
pub mod availability;
pub mod booking;
pub mod clinics;
pub mod clock;
pub mod conflict;
pub mod locks;
pub mod notify;
pub mod slots;
pub mod stats;

pub use availability::AvailabilityService;
pub use booking::BookingService;
pub use clinics::ClinicDirectoryService;
pub use clock::{Clock, FixedClock, SystemClock};
pub use conflict::ConflictDetectionService;
pub use locks::SlotLockService;
pub use notify::NotificationService;
pub use slots::TemplateService;
pub use stats::StatsService;
