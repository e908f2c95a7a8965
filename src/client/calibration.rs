//! Corner calibration controller.
//!
//! Synchronous and clock-injected: pointer and keyboard events come in,
//! corner state and save decisions come out. The session driver owns the
//! network; saves are returned as [`SaveRequest`] values (or surfaced later
//! by [`CalibrationController::due_save`] once a nudge burst settles).
//!
//! Drag saves are throttled to one per window, nudge saves are debounced
//! behind a quiet period, and lifting the pointer always saves regardless of
//! either window.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use nalgebra::Matrix4;

use crate::domain::{CalibrationRecord, Corner, CornerSet, Point};
use crate::geometry::{compute_transform, has_polygon_error, is_within_bounds, matrix3d};

/// Save windows. Dashboard-tunable; the defaults match the drag cadence the
/// projector comfortably redraws at.
#[derive(Debug, Clone, Copy)]
pub struct SaveTuning {
    pub throttle: TimeDelta,
    pub debounce: TimeDelta,
}

impl Default for SaveTuning {
    fn default() -> Self {
        Self {
            throttle: TimeDelta::milliseconds(100),
            debounce: TimeDelta::milliseconds(150),
        }
    }
}

/// A calibration snapshot the driver should persist.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub record: CalibrationRecord,
}

/// What became of a server-pushed corner payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalOutcome {
    Applied,
    IgnoredIdentical,
    IgnoredDragActive,
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    corner: Corner,
    grab_offset: Point,
}

pub struct CalibrationController {
    clock: Arc<dyn Clock>,
    tuning: SaveTuning,
    corners: CornerSet,
    screen_width: f64,
    screen_height: f64,
    calibrating: bool,
    selected: Option<Corner>,
    drag: Option<DragState>,
    last_save_at: Option<DateTime<Utc>>,
    nudge_deadline: Option<DateTime<Utc>>,
    transform: Option<Matrix4<f64>>,
    polygon_error: bool,
    bounds_error: bool,
    transforms_computed: u64,
}

impl CalibrationController {
    pub fn new(
        clock: Arc<dyn Clock>,
        screen_width: f64,
        screen_height: f64,
        initial: Option<CornerSet>,
    ) -> Self {
        let corners = initial.unwrap_or_else(|| CornerSet::full_viewport(screen_width, screen_height));
        let mut controller = Self {
            clock,
            tuning: SaveTuning::default(),
            corners,
            screen_width,
            screen_height,
            calibrating: false,
            selected: None,
            drag: None,
            last_save_at: None,
            nudge_deadline: None,
            transform: None,
            polygon_error: false,
            bounds_error: false,
            transforms_computed: 0,
        };
        controller.recompute();
        controller
    }

    pub fn with_tuning(mut self, tuning: SaveTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn corners(&self) -> &CornerSet {
        &self.corners
    }

    pub fn calibrating(&self) -> bool {
        self.calibrating
    }

    pub fn selected_corner(&self) -> Option<Corner> {
        self.selected
    }

    pub fn polygon_error(&self) -> bool {
        self.polygon_error
    }

    pub fn bounds_error(&self) -> bool {
        self.bounds_error
    }

    /// CSS transform for the projection surface, absent while the quad is
    /// degenerate.
    pub fn css_transform(&self) -> Option<String> {
        self.transform.as_ref().map(matrix3d)
    }

    pub fn enter_calibration(&mut self) {
        self.calibrating = true;
    }

    /// Leave calibration mode. A nudge save still waiting out its quiet
    /// period is flushed rather than dropped.
    pub fn exit_calibration(&mut self) -> Option<SaveRequest> {
        self.calibrating = false;
        self.selected = None;
        self.drag = None;
        if self.nudge_deadline.take().is_some() {
            self.last_save_at = Some(self.clock.utc());
            return Some(self.save_request());
        }
        None
    }

    pub fn select_corner(&mut self, corner: Option<Corner>) {
        self.selected = corner;
    }

    /// Grab a corner. The offset between the pointer and the corner is kept
    /// so the corner does not jump to the pointer tip.
    pub fn begin_drag(&mut self, corner: Corner, pointer: Point) {
        if !self.calibrating {
            return;
        }
        let current = self.corners.get(corner);
        self.selected = Some(corner);
        self.drag = Some(DragState {
            corner,
            grab_offset: Point::new(pointer.x - current.x, pointer.y - current.y),
        });
    }

    pub fn drag_active(&self) -> bool {
        self.drag.is_some()
    }

    /// Move the grabbed corner. Axes are rejected independently at the
    /// viewport edges: a pointer past the right edge still moves the corner
    /// vertically.
    pub fn pointer_move(&mut self, pointer: Point) -> Option<SaveRequest> {
        let drag = self.drag?;
        let candidate = Point::new(
            pointer.x - drag.grab_offset.x,
            pointer.y - drag.grab_offset.y,
        );
        let mut position = self.corners.get(drag.corner);
        if (0.0..=self.screen_width).contains(&candidate.x) {
            position.x = candidate.x;
        }
        if (0.0..=self.screen_height).contains(&candidate.y) {
            position.y = candidate.y;
        }
        self.corners.set(drag.corner, position);
        self.recompute();

        let now = self.clock.utc();
        let open = self
            .last_save_at
            .is_none_or(|last| now - last >= self.tuning.throttle);
        if open {
            self.last_save_at = Some(now);
            Some(self.save_request())
        } else {
            None
        }
    }

    /// Release the pointer: the drag ends and the final position is saved
    /// unconditionally.
    pub fn pointer_up(&mut self) -> Option<SaveRequest> {
        self.drag.take()?;
        self.nudge_deadline = None;
        self.last_save_at = Some(self.clock.utc());
        Some(self.save_request())
    }

    /// Keyboard nudge of the selected corner, 1 px per press. The save is
    /// debounced: it becomes due once no nudge arrives for the quiet period.
    pub fn nudge(&mut self, dx: f64, dy: f64) {
        if !self.calibrating {
            return;
        }
        let Some(corner) = self.selected else {
            return;
        };
        let current = self.corners.get(corner);
        let candidate = Point::new(current.x + dx, current.y + dy);
        let mut position = current;
        if (0.0..=self.screen_width).contains(&candidate.x) {
            position.x = candidate.x;
        }
        if (0.0..=self.screen_height).contains(&candidate.y) {
            position.y = candidate.y;
        }
        self.corners.set(corner, position);
        self.recompute();
        self.nudge_deadline = Some(self.clock.utc() + self.tuning.debounce);
    }

    /// Debounced save, once due. The driver calls this every tick.
    pub fn due_save(&mut self) -> Option<SaveRequest> {
        let deadline = self.nudge_deadline?;
        if self.clock.utc() < deadline {
            return None;
        }
        self.nudge_deadline = None;
        self.last_save_at = Some(self.clock.utc());
        Some(self.save_request())
    }

    /// Apply corners pushed from the server. Identical payloads and pushes
    /// arriving mid-drag are ignored; the local drag wins.
    pub fn apply_external(&mut self, record: &CalibrationRecord) -> ExternalOutcome {
        if self.drag.is_some() {
            return ExternalOutcome::IgnoredDragActive;
        }
        if record.corners.content_hash() == self.corners.content_hash() {
            return ExternalOutcome::IgnoredIdentical;
        }
        self.corners = record.corners;
        self.recompute();
        ExternalOutcome::Applied
    }

    /// How many times the transform has been recomputed. Exposed so tests
    /// can pin the recompute-per-event behaviour.
    pub fn transforms_computed(&self) -> u64 {
        self.transforms_computed
    }

    fn save_request(&self) -> SaveRequest {
        SaveRequest {
            record: CalibrationRecord {
                corners: self.corners,
                screen_width: self.screen_width,
                screen_height: self.screen_height,
                timestamp: self.clock.utc(),
            },
        }
    }

    fn recompute(&mut self) {
        let src = CornerSet::full_viewport(self.screen_width, self.screen_height).to_flat();
        self.transform = compute_transform(&src, &self.corners.to_flat()).ok();
        self.polygon_error = has_polygon_error(&self.corners);
        self.bounds_error = !is_within_bounds(&self.corners, self.screen_width, self.screen_height);
        self.transforms_computed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MutableClock;

    const W: f64 = 800.0;
    const H: f64 = 600.0;

    struct Rig {
        clock: Arc<MutableClock>,
        controller: CalibrationController,
    }

    fn rig() -> Rig {
        let clock = Arc::new(MutableClock::new(Utc::now()));
        let mut controller = CalibrationController::new(clock.clone(), W, H, None);
        controller.enter_calibration();
        Rig { clock, controller }
    }

    fn drag_tl(rig: &mut Rig) {
        rig.controller.begin_drag(Corner::TopLeft, Point::new(0.0, 0.0));
    }

    #[test]
    fn corners_default_to_the_full_viewport() {
        let rig = rig();
        assert_eq!(
            rig.controller.corners().get(Corner::BottomRight),
            Point::new(W, H)
        );
        assert!(!rig.controller.polygon_error());
        assert!(!rig.controller.bounds_error());
        assert!(rig.controller.css_transform().is_some());
    }

    #[test]
    fn drag_saves_are_throttled_to_one_per_window() {
        let mut rig = rig();
        drag_tl(&mut rig);

        assert!(rig.controller.pointer_move(Point::new(5.0, 5.0)).is_some());
        rig.clock.advance_millis(50);
        assert!(rig.controller.pointer_move(Point::new(8.0, 8.0)).is_none());
        rig.clock.advance_millis(50);
        assert!(rig.controller.pointer_move(Point::new(12.0, 9.0)).is_some());
    }

    #[test]
    fn every_move_recomputes_even_when_the_save_is_suppressed() {
        let mut rig = rig();
        drag_tl(&mut rig);
        let before = rig.controller.transforms_computed();

        rig.controller.pointer_move(Point::new(5.0, 5.0));
        rig.controller.pointer_move(Point::new(6.0, 6.0));
        rig.controller.pointer_move(Point::new(7.0, 7.0));
        assert_eq!(rig.controller.transforms_computed(), before + 3);
    }

    #[test]
    fn pointer_up_saves_unconditionally() {
        let mut rig = rig();
        drag_tl(&mut rig);
        assert!(rig.controller.pointer_move(Point::new(5.0, 5.0)).is_some());
        // Inside the throttle window, but the drag ended.
        assert!(rig.controller.pointer_move(Point::new(6.0, 6.0)).is_none());
        let save = rig.controller.pointer_up().expect("release always saves");
        assert_eq!(save.record.corners.get(Corner::TopLeft), Point::new(6.0, 6.0));
        assert!(!rig.controller.drag_active());
    }

    #[test]
    fn axes_are_rejected_independently_at_the_edges() {
        let mut rig = rig();
        drag_tl(&mut rig);
        rig.controller.pointer_move(Point::new(-20.0, 40.0));
        // x stayed put, y applied.
        assert_eq!(
            rig.controller.corners().get(Corner::TopLeft),
            Point::new(0.0, 40.0)
        );
    }

    #[test]
    fn nudge_saves_settle_after_the_quiet_period() {
        let mut rig = rig();
        rig.controller.select_corner(Some(Corner::TopRight));

        rig.controller.nudge(-1.0, 0.0);
        assert!(rig.controller.due_save().is_none());

        rig.clock.advance_millis(100);
        rig.controller.nudge(-1.0, 0.0); // burst continues, deadline pushed
        rig.clock.advance_millis(100);
        assert!(rig.controller.due_save().is_none());

        rig.clock.advance_millis(50);
        let save = rig.controller.due_save().expect("burst settled");
        assert_eq!(
            save.record.corners.get(Corner::TopRight),
            Point::new(W - 2.0, 0.0)
        );
        assert!(rig.controller.due_save().is_none());
    }

    #[test]
    fn leaving_calibration_flushes_a_pending_nudge_save() {
        let mut rig = rig();
        rig.controller.select_corner(Some(Corner::TopLeft));
        rig.controller.nudge(1.0, 0.0);

        // Still inside the quiet period when calibration mode ends.
        let save = rig
            .controller
            .exit_calibration()
            .expect("pending save flushed");
        assert_eq!(save.record.corners.get(Corner::TopLeft), Point::new(1.0, 0.0));
        assert!(!rig.controller.calibrating());
        assert!(rig.controller.due_save().is_none());
    }

    #[test]
    fn leaving_calibration_with_nothing_pending_saves_nothing() {
        let mut rig = rig();
        assert!(rig.controller.exit_calibration().is_none());
    }

    #[test]
    fn nudge_without_a_selection_is_a_no_op() {
        let mut rig = rig();
        rig.controller.nudge(1.0, 0.0);
        assert_eq!(
            rig.controller.corners().get(Corner::TopLeft),
            Point::new(0.0, 0.0)
        );
        assert!(rig.controller.due_save().is_none());
    }

    #[test]
    fn external_pushes_apply_when_different() {
        let mut rig = rig();
        let mut corners = *rig.controller.corners();
        corners.set(Corner::TopLeft, Point::new(10.0, 10.0));
        let record = CalibrationRecord {
            corners,
            screen_width: W,
            screen_height: H,
            timestamp: Utc::now(),
        };

        let before = rig.controller.transforms_computed();
        assert_eq!(
            rig.controller.apply_external(&record),
            ExternalOutcome::Applied
        );
        assert_eq!(rig.controller.transforms_computed(), before + 1);

        // The identical repeat is dropped without a recompute.
        assert_eq!(
            rig.controller.apply_external(&record),
            ExternalOutcome::IgnoredIdentical
        );
        assert_eq!(rig.controller.transforms_computed(), before + 1);
    }

    #[test]
    fn external_pushes_lose_to_an_active_drag() {
        let mut rig = rig();
        drag_tl(&mut rig);
        rig.controller.pointer_move(Point::new(5.0, 5.0));

        let record = CalibrationRecord {
            corners: CornerSet::full_viewport(W, H),
            screen_width: W,
            screen_height: H,
            timestamp: Utc::now(),
        };
        assert_eq!(
            rig.controller.apply_external(&record),
            ExternalOutcome::IgnoredDragActive
        );
        assert_eq!(
            rig.controller.corners().get(Corner::TopLeft),
            Point::new(5.0, 5.0)
        );
    }

    #[test]
    fn crossing_corners_raises_the_polygon_error() {
        let mut rig = rig();
        rig.controller.begin_drag(Corner::TopLeft, Point::new(0.0, 0.0));
        // Drag TL past TR and BR: the quad self-intersects.
        rig.controller.pointer_move(Point::new(W, H));
        assert!(rig.controller.polygon_error());
    }
}
