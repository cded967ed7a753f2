pub mod booking;
pub mod event;

pub use booking::{Booking, BookingStatus};
pub use event::{Event, EventDetails, EventDraft, EventStatus};
