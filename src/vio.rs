//! Visual-inertial odometry source.
//!
//! The VIO backend is an external pipeline: it selects and configures a
//! camera device, starts a session, and hands out already-fused poses.
//! [`VioPipeline`] and [`VioSession`] are the seam; [`crate::xr50`] is the
//! bundled hardware backend.

use std::time::Duration;

use crate::protocol;
use crate::source::{Received, Source};
use crate::types::{SourceKind, VioOutput};
use crate::{PosefeedError, Result};

/// Device selection and session startup of a VIO backend.
pub trait VioPipeline: Send {
    /// Select and configure the tracking device. Must fail unless exactly
    /// one device is present.
    fn configure_device(&mut self) -> Result<()>;

    /// Start streaming on the configured device.
    fn start_session(&mut self) -> Result<Box<dyn VioSession>>;
}

/// A running VIO session. Dropping it releases the device.
pub trait VioSession: Send {
    /// Block up to `timeout` for the next output; `Ok(None)` on timeout.
    fn wait_for_output(&mut self, timeout: Duration) -> Result<Option<VioOutput>>;
}

/// Source adapter over a VIO pipeline.
///
/// Poses are published as delivered; the calibrator is bypassed unless
/// `recenter` is set.
pub struct VioSource {
    session: Option<Box<dyn VioSession>>,
    pipeline: Option<Box<dyn VioPipeline>>,
    timeout: Duration,
    recenter: bool,
}

impl VioSource {
    /// Configure the device and start the session. Both steps are startup
    /// errors when they fail.
    pub fn start(
        mut pipeline: Box<dyn VioPipeline>,
        timeout: Duration,
        recenter: bool,
    ) -> Result<VioSource> {
        pipeline.configure_device()?;
        let session = pipeline.start_session()?;
        log::info!("VIO session started (recenter={})", recenter);

        Ok(VioSource {
            session: Some(session),
            pipeline: Some(pipeline),
            timeout,
            recenter,
        })
    }
}

impl Source for VioSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Vio
    }

    fn recenters(&self) -> bool {
        self.recenter
    }

    fn recv(&mut self) -> Result<Received> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| PosefeedError::TransportClosed("VIO session released".into()))?;

        Ok(match session.wait_for_output(self.timeout)? {
            Some(output) => match protocol::adapt_vio_output(&output) {
                Ok(reading) => Received::Reading(reading),
                Err(e) => Received::Rejected(e),
            },
            None => Received::Idle,
        })
    }

    fn shutdown(&mut self) {
        // Session first, then the pipeline that created it.
        if self.session.take().is_some() {
            log::info!("VIO session released");
        }
        self.pipeline.take();
    }
}
