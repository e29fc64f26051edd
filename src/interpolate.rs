//! Linearly interpolates visual state between simulation ticks so the
//! renderer can draw at a higher rate than the project runs.

/// Snapshot of a target's visual state at the previous tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationState {
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub scale: [f64; 2],
    pub costume: usize,
    pub ghost: f64,
}

#[derive(Debug, Clone)]
pub struct TargetState {
    pub visible: bool,
    pub is_stage: bool,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub scale: [f64; 2],
    pub current_costume: usize,
    pub ghost: f64,
    pub interpolation_data: Option<InterpolationState>,
}

/// Axis-aligned bounding box dimensions of the target's drawable, in stage
/// coordinates.
#[derive(Debug, Clone, Copy)]
pub struct DrawableBounds {
    pub width: f64,
    pub height: f64,
}

/// What the renderer should apply to the drawable this frame. `None`
/// fields mean the drawable keeps its current (snapped) state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawableUpdate {
    pub position: Option<[f64; 2]>,
    pub direction_and_scale: Option<(f64, [f64; 2])>,
    pub ghost: Option<f64>,
}

/// Snapshots every visible non-stage target after a tick; anything else
/// has its snapshot cleared.
pub fn setup(targets: &mut [TargetState]) {
    for target in targets {
        if target.visible && !target.is_stage {
            target.interpolation_data = Some(InterpolationState {
                x: target.x,
                y: target.y,
                direction: target.direction,
                scale: target.scale,
                costume: target.current_costume,
                ghost: target.ghost,
            });
        } else {
            target.interpolation_data = None;
        }
    }
}

/// Resets a drawable to the target's own state before the next simulation
/// tick, so mid-frame interpolation never leaks into project logic.
pub fn restore(target: &TargetState) -> Option<DrawableUpdate> {
    target.interpolation_data.as_ref().map(|_| DrawableUpdate {
        position: Some([target.x, target.y]),
        direction_and_scale: Some((target.direction, target.scale)),
        ghost: Some(target.ghost),
    })
}

/// Computes the sub-tick drawable update for one target.
pub fn interpolate(target: &TargetState, bounds: DrawableBounds) -> DrawableUpdate {
    let mut update = DrawableUpdate::default();
    let Some(data) = &target.interpolation_data else {
        return update;
    };

    let x_distance = (target.x - data.x).abs();
    let y_distance = (target.y - data.y).abs();
    if x_distance > 0.1 || y_distance > 0.1 {
        // Tolerance scales with the drawable so fast small sprites snap
        // instead of smearing.
        let x_tolerance = 50.0_f64.min(10.0 + bounds.width);
        let y_tolerance = 50.0_f64.min(10.0 + bounds.height);
        if x_distance < x_tolerance && y_distance < y_tolerance {
            update.position = Some([(data.x + target.x) / 2.0, (data.y + target.y) / 2.0]);
        }
    }

    let ghost_change = (target.ghost - data.ghost).abs();
    if ghost_change > 0.0 && ghost_change < 25.0 {
        update.ghost = Some((data.ghost + target.ghost) / 2.0);
    }

    if target.current_costume == data.costume {
        let mut direction = target.direction;
        let mut scale = target.scale;
        let mut changed = false;

        if target.direction != data.direction {
            // TODO: skip interpolation when the direction change is large
            let current = target.direction.to_radians();
            let starting = data.direction.to_radians();
            direction = (current.sin() + starting.sin())
                .atan2(current.cos() + starting.cos())
                .to_degrees();
            changed = true;
        }

        let signs_match = (target.scale[0].is_sign_positive() == data.scale[0].is_sign_positive())
            && (target.scale[1].is_sign_positive() == data.scale[1].is_sign_positive());
        if signs_match && target.scale != data.scale {
            let scale_change = (target.scale[0] - data.scale[0]).abs();
            if scale_change < 100.0 {
                scale = [
                    (data.scale[0] + target.scale[0]) / 2.0,
                    (data.scale[1] + target.scale[1]) / 2.0,
                ];
                changed = true;
            }
        }

        if changed {
            update.direction_and_scale = Some((direction, scale));
        }
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite() -> TargetState {
        TargetState {
            visible: true,
            is_stage: false,
            x: 0.0,
            y: 0.0,
            direction: 90.0,
            scale: [100.0, 100.0],
            current_costume: 0,
            ghost: 0.0,
            interpolation_data: None,
        }
    }

    fn bounds() -> DrawableBounds {
        DrawableBounds {
            width: 20.0,
            height: 20.0,
        }
    }

    #[test]
    fn setup_snapshots_only_visible_sprites() {
        let mut targets = vec![sprite(), sprite(), sprite()];
        targets[1].visible = false;
        targets[2].is_stage = true;
        setup(&mut targets);
        assert!(targets[0].interpolation_data.is_some());
        assert!(targets[1].interpolation_data.is_none());
        assert!(targets[2].interpolation_data.is_none());
    }

    #[test]
    fn position_midpoints_within_tolerance() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        target.x = 20.0;
        let update = interpolate(&target, bounds());
        assert_eq!(update.position, Some([10.0, 0.0]));
    }

    #[test]
    fn position_snaps_past_tolerance() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        // Tolerance is min(50, 10 + 20) = 30.
        target.x = 35.0;
        let update = interpolate(&target, bounds());
        assert_eq!(update.position, None);
        target.x = 29.0;
        assert!(interpolate(&target, bounds()).position.is_some());
    }

    #[test]
    fn tiny_movement_is_ignored() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        target.x = 0.05;
        assert_eq!(interpolate(&target, bounds()).position, None);
    }

    #[test]
    fn ghost_midpoints_only_in_open_band() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        target.ghost = 10.0;
        assert_eq!(interpolate(&target, bounds()).ghost, Some(5.0));
        target.ghost = 100.0;
        assert_eq!(interpolate(&target, bounds()).ghost, None);
        target.ghost = 0.0;
        assert_eq!(interpolate(&target, bounds()).ghost, None);
    }

    #[test]
    fn direction_averages_through_the_wrap() {
        let mut target = sprite();
        target.direction = 350.0;
        setup(std::slice::from_mut(&mut target));
        target.direction = 10.0;
        let update = interpolate(&target, bounds());
        let (direction, _) = update.direction_and_scale.expect("direction update");
        assert!(direction.abs() < 1e-9, "expected 0, got {}", direction);
    }

    #[test]
    fn direction_is_not_touched_after_costume_change() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        target.direction = 45.0;
        target.current_costume = 1;
        assert_eq!(interpolate(&target, bounds()).direction_and_scale, None);
    }

    #[test]
    fn scale_sign_flip_disables_interpolation() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        target.scale = [-100.0, 100.0];
        assert_eq!(interpolate(&target, bounds()).direction_and_scale, None);
    }

    #[test]
    fn scale_midpoints_under_the_bound() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        target.scale = [150.0, 150.0];
        let update = interpolate(&target, bounds());
        assert_eq!(update.direction_and_scale, Some((90.0, [125.0, 125.0])));
        target.scale = [250.0, 250.0];
        assert_eq!(interpolate(&target, bounds()).direction_and_scale, None);
    }

    #[test]
    fn restore_resets_to_target_state() {
        let mut target = sprite();
        setup(std::slice::from_mut(&mut target));
        target.x = 12.0;
        target.ghost = 40.0;
        let update = restore(&target).expect("snapshot present");
        assert_eq!(update.position, Some([12.0, 0.0]));
        assert_eq!(update.ghost, Some(40.0));
        target.interpolation_data = None;
        assert!(restore(&target).is_none());
    }
}
