pub mod chrome;
pub mod live;

pub use chrome::{CaptureOutcome, ChromeDriver, ConnectionMode};
pub use live::{ElementHandle, LivePage};
