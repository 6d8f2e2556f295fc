pub mod browser;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod message;
pub mod page;
pub mod server;

//  Re-export commonly used items
pub use browser::{CaptureOutcome, ChromeDriver, ConnectionMode, ElementHandle, LivePage};
pub use capture::{
    CaptureSessions, ContextMetrics, InitReply, MetricsReply, PageMetrics, ReleaseReply,
    ScrollReply, ScrollToReply,
};
pub use config::{CaptureConfig, DetectionConfig, SettleConfig, TileConfig};
pub use detect::{Detector, ScrollTarget, TargetKind, TargetSummary};
pub use error::{CaptureError, Result};
pub use message::{CaptureMessage, Dispatcher};
pub use page::{NodeId, NodeSpec, PageHost, PageModel};
