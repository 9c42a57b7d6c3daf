//! Movement state inferred from height telemetry.
//!
//! Every sample is classified against the previous one: any change in height
//! means the desk is travelling, otherwise the height is compared against the
//! configured sit/stand positions with a fixed hysteresis margin. There is no
//! debouncing.

use core::fmt;

use log::debug;

use crate::codec::{self, CodecError};

/// Margin around the sit/stand heights that still counts as "at" the position.
pub const HYSTERESIS_CM: f32 = 2.0;

/// Coarse desk state published to the rest of the controller.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DeskState {
    GoingUp,
    GoingDown,
    Standing,
    #[default]
    Sitting,
    /// At rest somewhere between the two configured positions.
    Stopped,
}

impl DeskState {
    /// True while the desk is travelling.
    #[must_use]
    pub const fn is_moving(self) -> bool {
        matches!(self, DeskState::GoingUp | DeskState::GoingDown)
    }

    /// True when the desk is raised or heading there.
    #[must_use]
    pub const fn is_raised_or_rising(self) -> bool {
        matches!(self, DeskState::GoingUp | DeskState::Standing)
    }

    /// True when the desk is lowered or heading there.
    #[must_use]
    pub const fn is_lowered_or_falling(self) -> bool {
        matches!(self, DeskState::GoingDown | DeskState::Sitting)
    }
}

impl fmt::Display for DeskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeskState::GoingUp => "going up",
            DeskState::GoingDown => "going down",
            DeskState::Standing => "standing",
            DeskState::Sitting => "sitting",
            DeskState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Rejected sit/stand pair.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GeometryError {
    /// A height is negative or not finite.
    InvalidHeight(f32),
    /// Standing height must be strictly above sitting height.
    Inverted { sitting_cm: f32, standing_cm: f32 },
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::InvalidHeight(height) => write!(f, "invalid desk height {height}"),
            GeometryError::Inverted {
                sitting_cm,
                standing_cm,
            } => write!(
                f,
                "standing height {standing_cm} cm must exceed sitting height {sitting_cm} cm"
            ),
        }
    }
}

/// Configured sit and stand heights, in centimetres.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DeskGeometry {
    sitting_cm: f32,
    standing_cm: f32,
}

impl DeskGeometry {
    pub fn new(sitting_cm: f32, standing_cm: f32) -> Result<Self, GeometryError> {
        for height in [sitting_cm, standing_cm] {
            if !height.is_finite() || height < 0.0 {
                return Err(GeometryError::InvalidHeight(height));
            }
        }
        if standing_cm <= sitting_cm {
            return Err(GeometryError::Inverted {
                sitting_cm,
                standing_cm,
            });
        }

        Ok(Self {
            sitting_cm,
            standing_cm,
        })
    }

    #[must_use]
    pub const fn sitting_cm(&self) -> f32 {
        self.sitting_cm
    }

    #[must_use]
    pub const fn standing_cm(&self) -> f32 {
        self.standing_cm
    }
}

/// Classifies a sample against the previous one.
///
/// Travel wins over position: a rising sample reports `GoingUp` even when it is
/// already within the standing margin.
#[must_use]
pub fn classify(previous_cm: f32, new_cm: f32, geometry: &DeskGeometry) -> DeskState {
    if new_cm > previous_cm {
        DeskState::GoingUp
    } else if new_cm < previous_cm {
        DeskState::GoingDown
    } else if new_cm > geometry.standing_cm - HYSTERESIS_CM {
        DeskState::Standing
    } else if new_cm < geometry.sitting_cm + HYSTERESIS_CM {
        DeskState::Sitting
    } else {
        DeskState::Stopped
    }
}

/// Tracks the last known height and the state derived from it.
#[derive(Debug)]
pub struct MovementTracker<'a> {
    geometry: &'a DeskGeometry,
    height_cm: Option<f32>,
    state: DeskState,
}

impl<'a> MovementTracker<'a> {
    #[must_use]
    pub const fn new(geometry: &'a DeskGeometry) -> Self {
        Self {
            geometry,
            height_cm: None,
            state: DeskState::Sitting,
        }
    }

    /// Feeds one height sample and returns the resulting state.
    ///
    /// The first sample only establishes the baseline height.
    pub fn observe(&mut self, height_cm: f32) -> DeskState {
        if let Some(previous) = self.height_cm {
            self.state = classify(previous, height_cm, self.geometry);
        }
        self.height_cm = Some(height_cm);
        debug!("height {height_cm:.1} cm -> {}", self.state);
        self.state
    }

    /// Decodes a raw notification and feeds it to [`Self::observe`].
    pub fn observe_frame(&mut self, frame: &[u8]) -> Result<DeskState, CodecError> {
        let height = codec::decode_height_notification(frame)?;
        Ok(self.observe(height))
    }

    #[must_use]
    pub const fn state(&self) -> DeskState {
        self.state
    }

    /// Last reported height, if any sample has arrived.
    #[must_use]
    pub const fn height_cm(&self) -> Option<f32> {
        self.height_cm
    }

    #[must_use]
    pub const fn geometry(&self) -> &DeskGeometry {
        self.geometry
    }

    /// Overrides the state after a successful move command, ahead of telemetry.
    pub(crate) fn force(&mut self, state: DeskState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_height_notification;

    fn geometry() -> DeskGeometry {
        DeskGeometry::new(75.0, 123.0).expect("valid geometry")
    }

    #[test]
    fn travel_takes_priority_over_position() {
        let geometry = geometry();
        assert_eq!(classify(120.0, 122.0, &geometry), DeskState::GoingUp);
        assert_eq!(classify(77.0, 75.0, &geometry), DeskState::GoingDown);
    }

    #[test]
    fn hysteresis_margin_is_exclusive() {
        let geometry = geometry();
        assert_eq!(classify(121.5, 121.5, &geometry), DeskState::Standing);
        assert_eq!(classify(121.0, 121.0, &geometry), DeskState::Stopped);
        assert_eq!(classify(76.5, 76.5, &geometry), DeskState::Sitting);
        assert_eq!(classify(77.0, 77.0, &geometry), DeskState::Stopped);
        assert_eq!(classify(100.0, 100.0, &geometry), DeskState::Stopped);
    }

    #[test]
    fn first_sample_sets_baseline_only() {
        let geometry = geometry();
        let mut tracker = MovementTracker::new(&geometry);
        assert_eq!(tracker.height_cm(), None);

        assert_eq!(tracker.observe(110.0), DeskState::Sitting);
        assert_eq!(tracker.height_cm(), Some(110.0));
        assert_eq!(tracker.observe(110.0), DeskState::Stopped);
    }

    #[test]
    fn frames_are_decoded_before_classification() {
        let geometry = geometry();
        let mut tracker = MovementTracker::new(&geometry);

        tracker
            .observe_frame(&encode_height_notification(750))
            .expect("valid frame");
        let state = tracker
            .observe_frame(&encode_height_notification(900))
            .expect("valid frame");
        assert_eq!(state, DeskState::GoingUp);

        assert!(tracker.observe_frame(&[0x7E]).is_err());
        assert_eq!(tracker.state(), DeskState::GoingUp, "bad frames leave state intact");
    }

    #[test]
    fn geometry_rejects_inverted_and_invalid_heights() {
        assert!(matches!(
            DeskGeometry::new(120.0, 75.0),
            Err(GeometryError::Inverted { .. })
        ));
        assert!(matches!(
            DeskGeometry::new(75.0, 75.0),
            Err(GeometryError::Inverted { .. })
        ));
        assert!(matches!(
            DeskGeometry::new(-1.0, 75.0),
            Err(GeometryError::InvalidHeight(_))
        ));
        assert!(matches!(
            DeskGeometry::new(75.0, f32::INFINITY),
            Err(GeometryError::InvalidHeight(_))
        ));
    }
}
