//! Sink-neutral shot records and the unit normalisation applied at the
//! device boundary.
//!
//! The device reports speeds in m/s and spin axis with the opposite sign
//! convention from the sinks, so conversion happens here, once, before a
//! shot leaves the core.

use serde::Serialize;

use crate::domain::proto::ShotMetrics;

/// Metres per second to miles per hour.
const MS_TO_MPH: f32 = 2.2369;

/// One normalised shot, ready for any downstream sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ShotRecord {
    pub shot_id: u32,
    /// Ball speed, mph.
    pub ball_speed: f32,
    /// Vertical launch angle, degrees.
    pub launch_angle: f32,
    /// Horizontal launch direction, degrees.
    pub launch_direction: f32,
    /// Spin axis, degrees, sink sign convention.
    pub spin_axis: f32,
    /// Total spin, rpm.
    pub total_spin: f32,
    /// Side spin component, rpm.
    pub side_spin: f32,
    /// Back spin component, rpm.
    pub back_spin: f32,
    /// Club head speed, mph.
    pub club_speed: f32,
    /// Angle of attack, degrees.
    pub attack_angle: f32,
    /// Club face angle, degrees.
    pub club_face: f32,
    /// Club path angle, degrees.
    pub club_path: f32,
}

impl ShotRecord {
    /// Normalise raw device metrics into the sink schema.
    pub fn from_metrics(metrics: &ShotMetrics) -> Self {
        let ball = metrics.ball.unwrap_or_default();
        let club = metrics.club.unwrap_or_default();

        let flipped_axis = -ball.spin_axis;
        let axis_rad = flipped_axis.to_radians();

        Self {
            shot_id: metrics.shot_id,
            ball_speed: ball.ball_speed * MS_TO_MPH,
            launch_angle: ball.launch_angle,
            launch_direction: ball.launch_direction,
            spin_axis: flipped_axis,
            total_spin: ball.total_spin,
            side_spin: ball.total_spin * axis_rad.sin(),
            back_spin: ball.total_spin * axis_rad.cos(),
            club_speed: club.club_head_speed * MS_TO_MPH,
            attack_angle: club.attack_angle,
            club_face: club.club_angle_face,
            club_path: club.club_angle_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::proto::{BallMetrics, ClubMetrics};

    fn approx(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-2, "{a} !~ {b}");
    }

    #[test]
    fn test_normalisation() {
        let metrics = ShotMetrics {
            shot_id: 42,
            ball: Some(BallMetrics {
                ball_speed: 50.0,
                launch_angle: 14.5,
                launch_direction: -1.2,
                spin_axis: 3.0,
                total_spin: 3000.0,
            }),
            club: Some(ClubMetrics {
                club_head_speed: 40.0,
                attack_angle: -2.0,
                club_angle_face: 1.0,
                club_angle_path: 0.5,
            }),
        };
        let shot = ShotRecord::from_metrics(&metrics);

        approx(shot.ball_speed, 111.845);
        approx(shot.club_speed, 89.476);
        approx(shot.spin_axis, -3.0);
        approx(shot.side_spin, 3000.0 * (-3.0f32).to_radians().sin());
        approx(shot.back_spin, 3000.0 * (-3.0f32).to_radians().cos());
        assert_eq!(shot.launch_angle, 14.5);
        assert_eq!(shot.club_path, 0.5);
    }

    #[test]
    fn test_missing_club_metrics_default_to_zero() {
        let metrics = ShotMetrics {
            shot_id: 1,
            ball: Some(BallMetrics { ball_speed: 10.0, ..Default::default() }),
            club: None,
        };
        let shot = ShotRecord::from_metrics(&metrics);
        assert_eq!(shot.club_speed, 0.0);
        approx(shot.ball_speed, 22.369);
    }
}
