pub mod clock;
pub mod scheduled;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduled::ScheduledTask;
