//! Kinematics recomputation from positions and the lap clock.
//!
//! Every computation here is per lap: differences restart at the first
//! sample of each lap and gap filling only ever uses anchors from the same
//! lap. Positions are in world units and the clock in milliseconds, so
//! derivatives are scaled by 1000 to give per-second rates.

use crate::types::{Axes, KinematicLimits, Kinematics, TelemetryTable, Vec3};

/// Counts of values touched while recomputing kinematics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KinematicsStats {
    /// G-force values (summed over axes) masked as implausible.
    pub g_force_masked: usize,
    /// G-force values left missing because their lap had no valid anchor.
    pub g_force_unresolved: usize,
    /// Front wheel angles filled from neighbouring samples.
    pub wheel_angle_filled: usize,
    /// Front wheel angles left missing.
    pub wheel_angle_unresolved: usize,
}

/// Per-second rate of change of `values` over `times_ms`.
///
/// The first entry is always zero. A non-positive time step or a
/// non-finite result also yields zero.
#[must_use]
pub fn differentiate(values: &[f64], times_ms: &[f64]) -> Vec<f64> {
    let mut rates = Vec::with_capacity(values.len());
    if values.is_empty() {
        return rates;
    }
    rates.push(0.0);
    for (v, t) in values.windows(2).zip(times_ms.windows(2)) {
        let dt = t[1] - t[0];
        let rate = 1000.0 * (v[1] - v[0]) / dt;
        rates.push(if dt > 0.0 && rate.is_finite() { rate } else { 0.0 });
    }
    rates
}

/// Fill missing values in place.
///
/// Interior gaps are interpolated linearly by position between the nearest
/// valid neighbours; leading and trailing gaps take the nearest valid
/// value. Returns how many values were filled. A slice with no valid value
/// is left unchanged.
pub fn fill_gaps(values: &mut [Option<f64>]) -> usize {
    let anchors: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();
    let (Some(&first), Some(&last)) = (anchors.first(), anchors.last()) else {
        return 0;
    };

    let mut filled = 0;
    let lead = values[first];
    for slot in &mut values[..first] {
        *slot = lead;
        filled += 1;
    }
    let trail = values[last];
    for slot in &mut values[last + 1..] {
        *slot = trail;
        filled += 1;
    }

    for pair in anchors.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi - lo < 2 {
            continue;
        }
        let (Some(a), Some(b)) = (values[lo], values[hi]) else {
            continue;
        };
        #[allow(clippy::cast_precision_loss)]
        let span = (hi - lo) as f64;
        for i in lo + 1..hi {
            #[allow(clippy::cast_precision_loss)]
            let t = (i - lo) as f64 / span;
            values[i] = Some((b - a).mul_add(t, a));
            filled += 1;
        }
    }
    filled
}

/// Clip `v` to `±limit`.
fn clip(v: f64, limit: f64) -> f64 {
    v.min(limit).max(-limit)
}

/// Velocity and filled G-force for one axis of one lap.
fn axis_kinematics(
    positions: &[f64],
    times_ms: &[f64],
    limits: &KinematicLimits,
    stats: &mut KinematicsStats,
) -> (Vec<f64>, Vec<Option<f64>>) {
    let velocity: Vec<f64> = differentiate(positions, times_ms)
        .into_iter()
        .map(|v| clip(v, limits.velocity_limit))
        .collect();

    let mut g_force: Vec<Option<f64>> = differentiate(&velocity, times_ms)
        .into_iter()
        .map(|a| a / limits.gravity)
        .map(|g| (g.abs() <= limits.g_force_limit).then_some(g))
        .collect();
    stats.g_force_masked += g_force.iter().filter(|g| g.is_none()).count();
    fill_gaps(&mut g_force);
    stats.g_force_unresolved += g_force.iter().filter(|g| g.is_none()).count();

    (velocity, g_force)
}

/// Recompute velocity, G-force and front wheel angle for every lap.
#[must_use]
pub fn recompute_kinematics(table: TelemetryTable, limits: &KinematicLimits) -> TelemetryTable {
    recompute_kinematics_with_stats(table, limits).0
}

/// [`recompute_kinematics`], also returning what was masked and filled.
#[must_use]
pub fn recompute_kinematics_with_stats(
    table: TelemetryTable,
    limits: &KinematicLimits,
) -> (TelemetryTable, KinematicsStats) {
    let partition = table.partition();
    let mut samples = table.into_samples();
    let mut stats = KinematicsStats::default();

    let components: Axes<fn(&Vec3) -> f64> = Axes::new(|p| p.x, |p| p.y, |p| p.z);

    for rows in partition.values() {
        let times: Vec<f64> = rows.iter().map(|&r| samples[r].frame.lap_time_ms).collect();
        let per_axis = components.map(|pick| {
            let positions: Vec<f64> = rows
                .iter()
                .map(|&r| pick(&samples[r].frame.position))
                .collect();
            axis_kinematics(&positions, &times, limits, &mut stats)
        });

        let mut wheel: Vec<Option<f64>> = rows
            .iter()
            .map(|&r| samples[r].frame.front_wheel_angle.filter(|a| a.is_finite()))
            .collect();
        stats.wheel_angle_filled += fill_gaps(&mut wheel);
        stats.wheel_angle_unresolved += wheel.iter().filter(|a| a.is_none()).count();

        for (i, &row) in rows.iter().enumerate() {
            let sample = &mut samples[row];
            sample.kinematics = Some(Kinematics {
                velocity: per_axis.as_ref().map(|(velocity, _)| velocity[i]),
                g_force: per_axis.as_ref().map(|(_, g_force)| g_force[i]),
            });
            sample.frame.front_wheel_angle = wheel[i];
        }
    }

    (TelemetryTable::new(samples), stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::test_support::{lap_of, sample, table};
    use crate::types::{LapIndex, PipelineConfig};

    fn limits() -> KinematicLimits {
        KinematicLimits::default()
    }

    fn velocity_x(t: &TelemetryTable) -> Vec<f64> {
        t.samples()
            .iter()
            .map(|s| s.kinematics.unwrap().velocity.x)
            .collect()
    }

    // --- differentiate ---

    #[test]
    fn differentiate_starts_at_zero() {
        let rates = differentiate(&[5.0, 6.0, 8.0], &[0.0, 100.0, 200.0]);
        assert_eq!(rates, vec![0.0, 10.0, 20.0]);
        assert!(differentiate(&[], &[]).is_empty());
    }

    #[test]
    fn non_positive_time_step_gives_zero() {
        let rates = differentiate(&[0.0, 1.0, 2.0], &[0.0, 0.0, -10.0]);
        assert_eq!(rates, vec![0.0, 0.0, 0.0]);
    }

    // --- fill_gaps ---

    #[test]
    fn fill_gaps_interpolates_interior() {
        let mut values = vec![Some(0.0), None, None, Some(3.0)];
        assert_eq!(fill_gaps(&mut values), 2);
        let got: Vec<f64> = values.into_iter().map(Option::unwrap).collect();
        for (g, e) in got.iter().zip([0.0, 1.0, 2.0, 3.0]) {
            assert!((g - e).abs() < 1e-12);
        }
    }

    #[test]
    fn fill_gaps_extends_edges() {
        let mut values = vec![None, Some(2.0), None, Some(4.0), None, None];
        assert_eq!(fill_gaps(&mut values), 4);
        assert_eq!(
            values,
            vec![Some(2.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0), Some(4.0)]
        );
    }

    #[test]
    fn fill_gaps_without_anchor_leaves_missing() {
        let mut values = vec![None, None];
        assert_eq!(fill_gaps(&mut values), 0);
        assert_eq!(values, vec![None, None]);
    }

    // --- recompute_kinematics ---

    #[test]
    fn stationary_then_moving_lap() {
        // (0,0) -> (0,0) -> (10,0) at 0, 100, 200 ms.
        let t = table(vec![lap_of(0, &[(0.0, 0.0), (0.0, 0.0), (10.0, 0.0)])]);
        let out = recompute_kinematics(t, &limits());
        assert_eq!(velocity_x(&out), vec![0.0, 0.0, 100.0]);
        // The 100/s jump over 0.1 s is ~102 G: masked and forward-filled.
        let gx: Vec<Option<f64>> = out
            .samples()
            .iter()
            .map(|s| s.kinematics.unwrap().g_force.x)
            .collect();
        assert_eq!(gx, vec![Some(0.0), Some(0.0), Some(0.0)]);
    }

    #[test]
    fn first_sample_of_every_lap_is_zero() {
        let t = table(vec![
            lap_of(0, &[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]),
            lap_of(1, &[(500.0, 500.0), (501.0, 500.0)]),
        ]);
        let out = recompute_kinematics(t, &limits());
        for rows in out.partition().values() {
            let k = out.samples()[rows[0]].kinematics.unwrap();
            assert_eq!(k.velocity, Vec3::new(0.0, 0.0, 0.0));
            assert_eq!(k.g_force, Axes::new(Some(0.0), Some(0.0), Some(0.0)));
        }
    }

    #[test]
    fn each_axis_is_differentiated_separately() {
        let mut lap = lap_of(0, &[(0.0, 0.0), (1.0, 2.0)]);
        lap[1].frame.position.z = 3.0;
        let out = recompute_kinematics(table(vec![lap]), &limits());
        let k = out.samples()[1].kinematics.unwrap();
        assert_eq!(k.velocity, Vec3::new(10.0, 20.0, 30.0));
        // Every axis jumps from 0 past the G-force bound and is filled back to 0.
        assert_eq!(k.g_force, Axes::new(Some(0.0), Some(0.0), Some(0.0)));
    }

    #[test]
    fn velocity_is_clipped() {
        let t = table(vec![lap_of(0, &[(0.0, 0.0), (50.0, -50.0)])]);
        let out = recompute_kinematics(t, &limits());
        let v = out.samples()[1].kinematics.unwrap().velocity;
        assert!((v.x - PipelineConfig::DEFAULT_VELOCITY_LIMIT).abs() < f64::EPSILON);
        assert!((v.y + PipelineConfig::DEFAULT_VELOCITY_LIMIT).abs() < f64::EPSILON);
    }

    #[test]
    fn g_force_stays_within_limit_after_masking() {
        // Alternating accelerations with occasional huge jumps.
        let points: Vec<(f64, f64)> = (0..40_u32)
            .map(|i| {
                let x = f64::from(i * i) * 0.3 + if i % 7 == 0 { 5.0 } else { 0.0 };
                (x, f64::from(i))
            })
            .collect();
        let (out, stats) = recompute_kinematics_with_stats(table(vec![lap_of(0, &points)]), &limits());
        assert!(stats.g_force_masked > 0);
        assert_eq!(stats.g_force_unresolved, 0);
        for s in out.samples() {
            let k = s.kinematics.unwrap();
            for v in [k.velocity.x, k.velocity.y, k.velocity.z] {
                assert!(v.abs() <= 100.0);
            }
            for g in [k.g_force.x, k.g_force.y, k.g_force.z] {
                assert!(g.unwrap().abs() <= 7.0);
            }
        }
    }

    #[test]
    fn masked_g_force_interpolates_between_anchors() {
        // Velocity 0, 0, 1, 1, 1 /s: one spike of ~1.02 G at row 2.
        let mut lap = lap_of(0, &[(0.0, 0.0); 5]);
        for (i, s) in lap.iter_mut().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let x = (i.saturating_sub(1)) as f64 * 0.1;
            s.frame.position.x = x;
        }
        let limits = KinematicLimits {
            g_force_limit: 1.0,
            ..KinematicLimits::default()
        };
        let out = recompute_kinematics(table(vec![lap]), &limits);
        let gx: Vec<f64> = out
            .samples()
            .iter()
            .map(|s| s.kinematics.unwrap().g_force.x.unwrap())
            .collect();
        // Rows: v = 0, 0, 1, 1, 1 -> g = 0, 0, 1.02 (masked), 0, 0.
        assert!(gx.iter().all(|g| g.abs() < 1e-9));
    }

    #[test]
    fn gaps_never_fill_across_laps() {
        let mut lap0 = lap_of(0, &[(0.0, 0.0), (1.0, 0.0)]);
        lap0[0].frame.front_wheel_angle = Some(12.0);
        lap0[1].frame.front_wheel_angle = Some(12.0);
        let mut lap1 = lap_of(1, &[(0.0, 0.0), (1.0, 0.0)]);
        lap1[0].frame.front_wheel_angle = None;
        lap1[1].frame.front_wheel_angle = None;
        let (out, stats) = recompute_kinematics_with_stats(table(vec![lap0, lap1]), &limits());
        let lap1_angles: Vec<Option<f64>> = out
            .lap(LapIndex(1))
            .map(|s| s.frame.front_wheel_angle)
            .collect();
        assert_eq!(lap1_angles, vec![None, None]);
        assert_eq!(stats.wheel_angle_unresolved, 2);
    }

    #[test]
    fn wheel_angle_is_interpolated_within_lap() {
        let mut lap = lap_of(0, &[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        lap[0].frame.front_wheel_angle = None;
        lap[1].frame.front_wheel_angle = Some(2.0);
        lap[2].frame.front_wheel_angle = Some(f64::NAN);
        lap[3].frame.front_wheel_angle = Some(6.0);
        let (out, stats) = recompute_kinematics_with_stats(table(vec![lap]), &limits());
        let angles: Vec<Option<f64>> = out
            .samples()
            .iter()
            .map(|s| s.frame.front_wheel_angle)
            .collect();
        assert_eq!(angles, vec![Some(2.0), Some(2.0), Some(4.0), Some(6.0)]);
        assert_eq!(stats.wheel_angle_filled, 2);
    }

    #[test]
    fn rows_keep_their_identity() {
        let t = table(vec![vec![sample(0, 0.0, 1.0, 1.0), sample(0, 100.0, 2.0, 1.0)]]);
        let before: Vec<_> = t.samples().iter().map(|s| s.frame.clone()).collect();
        let out = recompute_kinematics(t, &limits());
        let after: Vec<_> = out.samples().iter().map(|s| s.frame.clone()).collect();
        assert_eq!(before, after);
    }
}
