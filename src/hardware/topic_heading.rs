// Heading sensor fed by yaw samples from another node (IMU publisher).
//
// The runtime pushes each received sample into a `HeadingFeed`; the paired
// `TopicHeading` serves the latest one to the drive and reports a fault once
// it is older than the staleness timeout.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::{ActuatorError, HeadingSensor};

type Slot = Rc<Cell<Option<(f64, Instant)>>>;

/// Producer side, held by the runtime loop.
#[derive(Clone)]
pub struct HeadingFeed {
    latest: Slot,
}

impl HeadingFeed {
    /// Record a continuous yaw reading in degrees
    pub fn push(&self, yaw_deg: f64) {
        self.push_at(yaw_deg, Instant::now());
    }

    pub fn push_at(&self, yaw_deg: f64, received_at: Instant) {
        if yaw_deg.is_finite() {
            self.latest.set(Some((yaw_deg, received_at)));
        }
    }
}

/// Consumer side, owned by the drive coordinator.
pub struct TopicHeading {
    latest: Slot,
    zero: f64,
    timeout: Duration,
}

impl TopicHeading {
    pub fn new(timeout: Duration) -> (Self, HeadingFeed) {
        let latest: Slot = Rc::new(Cell::new(None));
        let feed = HeadingFeed {
            latest: latest.clone(),
        };
        (
            Self {
                latest,
                zero: 0.0,
                timeout,
            },
            feed,
        )
    }

    fn fresh_sample(&self) -> Result<f64, ActuatorError> {
        let (yaw, received_at) = self.latest.get().ok_or(ActuatorError::Unavailable)?;
        let age = received_at.elapsed();
        if age > self.timeout {
            return Err(ActuatorError::Stale {
                age_ms: age.as_millis() as u64,
            });
        }
        Ok(yaw)
    }
}

impl HeadingSensor for TopicHeading {
    fn angle_degrees(&mut self) -> Result<f64, ActuatorError> {
        Ok(self.fresh_sample()? - self.zero)
    }

    fn reset(&mut self) -> Result<(), ActuatorError> {
        self.zero = self.fresh_sample()?;
        Ok(())
    }
}
