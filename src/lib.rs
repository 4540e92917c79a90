//! # posefeed - pose ingestion for head tracking
//!
//! Feeds the latest 6-DoF pose from one of three transports to a host:
//! - Serial IMU lines (`qw,qx,qy,qz` at 115200 baud), orientation only
//! - UDP datagrams from a companion tracking process, position + orientation
//! - A visual-inertial odometry session (bundled XR50 backend over HID)
//!
//! One [`Session`] runs one source on one worker thread. Orientations can
//! be recentered at runtime, and the host reads poses from a
//! [`PoseStore`] by polling or blocking.
//!
//! ## Quick Start
//! ```no_run
//! use posefeed::{Session, SessionConfig};
//! use std::time::Duration;
//!
//! let session = Session::start(&SessionConfig::udp(50000)).unwrap();
//! for _ in 0..100 {
//!     let pose = session.store().wait_for_next_timeout(Duration::from_secs(1)).unwrap();
//!     println!("pos: {:?}", pose.position);
//! }
//! session.recenter();
//! session.stop();
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod calibration;
pub mod store;
pub mod config;
pub mod source;
pub mod serial;
pub mod udp;
pub mod vio;
pub mod xr50;
pub mod session;
pub mod ffi;

pub use calibration::Calibrator;
pub use config::SessionConfig;
pub use error::{ParseError, PosefeedError};
pub use session::{CancellationToken, Session, SessionEvent};
pub use source::{Received, Source};
pub use store::PoseStore;
pub use types::*;
pub use vio::{VioPipeline, VioSession};

/// Result type alias for posefeed operations.
pub type Result<T> = std::result::Result<T, PosefeedError>;
