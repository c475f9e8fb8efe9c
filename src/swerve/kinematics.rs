// Swerve kinematics for a four-module chassis
//
// Inverse: chassis velocity -> per-module (speed, angle).
// Forward: per-module wheel vectors -> best-fit rigid-body motion, used for
// odometry. All functions are pure and total over finite input.

use nalgebra::{Matrix3, Vector3};

use super::angle::Angle;
use super::state::{
    ChassisDisplacement, ChassisSpeeds, HeadingSample, ModuleGeometry, ModulePosition,
    ModuleState, MODULE_COUNT,
};

/// Wheel vectors shorter than this keep their previous steering angle.
const STANDSTILL_EPSILON: f64 = 1e-9;

/// Convert a chassis velocity command into one raw target per module.
///
/// # Arguments
/// * `speeds` - Requested chassis motion; field-relative input is rotated by
///   `-heading` into the chassis frame first
/// * `geometry` - Module mounting offsets, canonical order
/// * `heading` - Current sign-corrected heading
/// * `previous` - Angles from the last cycle, reused by any module whose
///   wheel vector is zero so the steering does not snap back at standstill
///
/// # Returns
/// Un-desaturated module states in canonical order
pub fn to_module_states(
    speeds: &ChassisSpeeds,
    geometry: &[ModuleGeometry; MODULE_COUNT],
    heading: HeadingSample,
    previous: &[Angle; MODULE_COUNT],
) -> [ModuleState; MODULE_COUNT] {
    let (vx, vy) = if speeds.field_relative {
        (-heading.angle()).rotate(speeds.vx, speeds.vy)
    } else {
        (speeds.vx, speeds.vy)
    };
    let omega = speeds.omega;

    std::array::from_fn(|i| {
        let wheel_x = vx - omega * geometry[i].mount_y;
        let wheel_y = vy + omega * geometry[i].mount_x;
        let speed = wheel_x.hypot(wheel_y);

        if speed < STANDSTILL_EPSILON {
            ModuleState::new(0.0, previous[i])
        } else {
            ModuleState::new(speed, Angle::from_vector(wheel_x, wheel_y))
        }
    })
}

/// Wheel angles pointing away from the chassis center, forming an X.
pub fn x_stance_states(geometry: &[ModuleGeometry; MODULE_COUNT]) -> [ModuleState; MODULE_COUNT] {
    std::array::from_fn(|i| {
        ModuleState::new(0.0, Angle::from_vector(geometry[i].mount_x, geometry[i].mount_y))
    })
}

/// Best-fit rigid-body displacement explaining four wheel displacements.
///
/// Each `positions[i]` holds the distance travelled by module `i` during the
/// step (not its running total) together with its steering angle.
pub fn to_chassis_displacement(
    positions: &[ModulePosition; MODULE_COUNT],
    geometry: &[ModuleGeometry; MODULE_COUNT],
) -> ChassisDisplacement {
    let vectors = positions.map(|p| (p.distance * p.angle.cos(), p.distance * p.angle.sin()));
    let [dx, dy, dtheta] = solve_rigid_motion(&vectors, geometry);
    ChassisDisplacement { dx, dy, dtheta }
}

/// Best-fit chassis velocity for four measured module states.
pub fn to_chassis_speeds(
    states: &[ModuleState; MODULE_COUNT],
    geometry: &[ModuleGeometry; MODULE_COUNT],
) -> ChassisSpeeds {
    let vectors = states.map(|s| (s.speed * s.angle.cos(), s.speed * s.angle.sin()));
    let [vx, vy, omega] = solve_rigid_motion(&vectors, geometry);
    ChassisSpeeds::new(vx, vy, omega)
}

/// Least-squares solve of
///   u_i = a - c * y_i
///   v_i = b + c * x_i
/// for (a, b, c) over all modules via the normal equations. A degenerate
/// layout (rejected by config validation) yields zero motion.
fn solve_rigid_motion(
    vectors: &[(f64, f64); MODULE_COUNT],
    geometry: &[ModuleGeometry; MODULE_COUNT],
) -> [f64; 3] {
    let n = MODULE_COUNT as f64;
    let sum_x: f64 = geometry.iter().map(|g| g.mount_x).sum();
    let sum_y: f64 = geometry.iter().map(|g| g.mount_y).sum();
    let sum_r2: f64 = geometry
        .iter()
        .map(|g| g.mount_x * g.mount_x + g.mount_y * g.mount_y)
        .sum();

    let normal = Matrix3::new(
        n, 0.0, -sum_y, //
        0.0, n, sum_x, //
        -sum_y, sum_x, sum_r2,
    );

    let mut rhs = Vector3::<f64>::zeros();
    for (&(u, v), g) in vectors.iter().zip(geometry.iter()) {
        rhs[0] += u;
        rhs[1] += v;
        rhs[2] += g.mount_x * v - g.mount_y * u;
    }

    match normal.lu().solve(&rhs) {
        Some(solution) if solution.iter().all(|x| x.is_finite()) => {
            [solution[0], solution[1], solution[2]]
        }
        _ => [0.0; 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    const TOL: f64 = 1e-9;

    fn square(half: f64) -> [ModuleGeometry; MODULE_COUNT] {
        rectangle(half, half)
    }

    fn rectangle(half_length: f64, half_width: f64) -> [ModuleGeometry; MODULE_COUNT] {
        [
            ModuleGeometry::new(half_length, half_width, Angle::ZERO),
            ModuleGeometry::new(half_length, -half_width, Angle::ZERO),
            ModuleGeometry::new(-half_length, half_width, Angle::ZERO),
            ModuleGeometry::new(-half_length, -half_width, Angle::ZERO),
        ]
    }

    fn zeros() -> [Angle; MODULE_COUNT] {
        [Angle::ZERO; MODULE_COUNT]
    }

    #[test]
    fn test_zero_command_keeps_previous_angles() {
        let previous = [
            Angle::from_degrees(10.0),
            Angle::from_degrees(-35.0),
            Angle::from_degrees(90.0),
            Angle::from_degrees(179.0),
        ];
        let states = to_module_states(
            &ChassisSpeeds::default(),
            &square(0.5),
            HeadingSample::default(),
            &previous,
        );
        for (state, prev) in states.iter().zip(previous.iter()) {
            assert_eq!(state.speed, 0.0);
            assert_eq!(state.angle, *prev);
        }
    }

    #[test]
    fn test_forward_command_on_unit_square() {
        let states = to_module_states(
            &ChassisSpeeds::new(4.8, 0.0, 0.0),
            &square(0.5),
            HeadingSample::default(),
            &zeros(),
        );
        for state in states {
            assert!((state.speed - 4.8).abs() < TOL);
            assert!(state.angle.radians().abs() < TOL);
        }
    }

    #[test]
    fn test_strafe_left_points_wheels_left() {
        let states = to_module_states(
            &ChassisSpeeds::new(0.0, 1.0, 0.0),
            &square(0.3),
            HeadingSample::default(),
            &zeros(),
        );
        for state in states {
            assert!((state.speed - 1.0).abs() < TOL);
            assert!((state.angle.radians() - FRAC_PI_2).abs() < TOL);
        }
    }

    #[test]
    fn test_pure_rotation_is_tangential_on_rectangle() {
        let geometry = rectangle(0.4, 0.25);
        let omega = 2.0;
        let states = to_module_states(
            &ChassisSpeeds::new(0.0, 0.0, omega),
            &geometry,
            HeadingSample::default(),
            &zeros(),
        );
        for (state, g) in states.iter().zip(geometry.iter()) {
            // Perpendicular to the radius vector
            let dot = state.angle.cos() * g.mount_x + state.angle.sin() * g.mount_y;
            assert!(dot.abs() < TOL, "module at ({}, {}) not tangential", g.mount_x, g.mount_y);
            assert!((state.speed - omega * g.radius()).abs() < TOL);
        }
    }

    #[test]
    fn test_rotation_speeds_differ_with_offset_per_axis() {
        // Front pair further out than back pair
        let geometry = [
            ModuleGeometry::new(0.6, 0.3, Angle::ZERO),
            ModuleGeometry::new(0.6, -0.3, Angle::ZERO),
            ModuleGeometry::new(-0.2, 0.3, Angle::ZERO),
            ModuleGeometry::new(-0.2, -0.3, Angle::ZERO),
        ];
        let states = to_module_states(
            &ChassisSpeeds::new(0.0, 0.0, 1.0),
            &geometry,
            HeadingSample::default(),
            &zeros(),
        );
        assert!(states[0].speed > states[2].speed);
        assert!((states[0].speed - states[1].speed).abs() < TOL);
    }

    #[test]
    fn test_field_relative_rotates_by_heading() {
        // Robot facing +90°: field-forward is robot-right
        let states = to_module_states(
            &ChassisSpeeds::field_relative(1.0, 0.0, 0.0),
            &square(0.5),
            HeadingSample::new(FRAC_PI_2),
            &zeros(),
        );
        for state in states {
            assert!((state.speed - 1.0).abs() < TOL);
            assert!((state.angle.radians() + FRAC_PI_2).abs() < TOL);
        }
    }

    #[test]
    fn test_field_relative_ignored_when_flag_clear() {
        let states = to_module_states(
            &ChassisSpeeds::new(1.0, 0.0, 0.0),
            &square(0.5),
            HeadingSample::new(FRAC_PI_2),
            &zeros(),
        );
        assert!(states[0].angle.radians().abs() < TOL);
    }

    #[test]
    fn test_x_stance_points_outward() {
        let states = x_stance_states(&square(0.5));
        let expected = [FRAC_PI_4, -FRAC_PI_4, 3.0 * FRAC_PI_4, -3.0 * FRAC_PI_4];
        for (state, want) in states.iter().zip(expected.iter()) {
            assert_eq!(state.speed, 0.0);
            assert!((state.angle.radians() - want).abs() < TOL);
        }
    }

    #[test]
    fn test_pure_rotation_round_trip() {
        let geometry = rectangle(0.4, 0.25);
        let dt = 0.02;
        let omega = 1.5;
        let states = to_module_states(
            &ChassisSpeeds::new(0.0, 0.0, omega),
            &geometry,
            HeadingSample::default(),
            &zeros(),
        );
        let steps = states.map(|s| ModulePosition::new(s.speed * dt, s.angle));
        let d = to_chassis_displacement(&steps, &geometry);
        assert!(d.dx.abs() < TOL);
        assert!(d.dy.abs() < TOL);
        assert!((d.dtheta - omega * dt).abs() < TOL);
    }

    #[test]
    fn test_chassis_speeds_recovers_combined_motion() {
        let geometry = rectangle(0.35, 0.3);
        let cmd = ChassisSpeeds::new(1.2, -0.4, 0.8);
        let states = to_module_states(&cmd, &geometry, HeadingSample::default(), &zeros());
        let back = to_chassis_speeds(&states, &geometry);
        assert!((back.vx - cmd.vx).abs() < TOL);
        assert!((back.vy - cmd.vy).abs() < TOL);
        assert!((back.omega - cmd.omega).abs() < TOL);
    }

    #[test]
    fn test_degenerate_geometry_yields_no_motion() {
        let geometry = [ModuleGeometry::default(); MODULE_COUNT];
        let steps = [ModulePosition::new(1.0, Angle::ZERO); MODULE_COUNT];
        let d = to_chassis_displacement(&steps, &geometry);
        assert_eq!(d, ChassisDisplacement::default());
    }

    proptest! {
        #[test]
        fn translation_round_trip(vx in -5.0..5.0f64, vy in -5.0..5.0f64) {
            let geometry = rectangle(0.3365, 0.3365);
            let dt = 0.02;
            let states = to_module_states(
                &ChassisSpeeds::new(vx, vy, 0.0),
                &geometry,
                HeadingSample::default(),
                &zeros(),
            );
            let steps = states.map(|s| ModulePosition::new(s.speed * dt, s.angle));
            let d = to_chassis_displacement(&steps, &geometry);
            prop_assert!((d.dx - vx * dt).abs() < 1e-9);
            prop_assert!((d.dy - vy * dt).abs() < 1e-9);
            prop_assert!(d.dtheta.abs() < 1e-9);
        }
    }
}
