//! Track model: closed-loop centerline with a drivable band
//!
//! The centerline is a counter-clockwise polyline sampled at a fixed spacing.
//! Point 0 is the start/finish line. Lateral offsets are positive on the left
//! of the travel direction.

use std::f64::consts::{PI, TAU};

use glam::DVec2;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::config::TrackConfig;
use crate::consts::*;
use crate::error::{ConfigError, require_positive};
use crate::polar_to_cartesian;

/// Points farther than this many half-widths from the centerline get the sentinel offset
const INFLUENCE_HALF_WIDTHS: f64 = 4.0;
/// Attempts at shrinking a random loop's harmonics before giving up
const RANDOM_SHAPE_ATTEMPTS: u32 = 8;
/// Lower bound on centerline samples for tiny tracks
const MIN_SAMPLES: usize = 16;

/// How the centerline is generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackShape {
    /// Circle around the origin
    Circle { radius: f64 },
    /// Two straights joined by semicircles (start is mid bottom straight)
    Stadium { straight_length: f64, radius: f64 },
    /// Axis-aligned ellipse
    Ellipse { semi_major: f64, semi_minor: f64 },
    /// Seeded polar loop: base radius perturbed by a few random harmonics
    Random {
        base_radius: f64,
        harmonics: u32,
        amplitude: f64,
    },
    /// Closed centripetal Catmull-Rom spline through the given points
    Waypoints { points: Vec<[f64; 2]> },
}

impl Default for TrackShape {
    fn default() -> Self {
        TrackShape::Random {
            base_radius: DEFAULT_BASE_RADIUS,
            harmonics: 4,
            amplitude: 0.25,
        }
    }
}

/// Nearest-point projection onto the centerline
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    /// Arc length from the start line to the projected point
    pub arc_length: f64,
    /// Perpendicular distance, positive on the left of travel
    pub signed_distance: f64,
    /// Index of the segment holding the projection
    pub segment: usize,
}

/// Immutable race geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    points: Vec<DVec2>,
    /// Cumulative arc length at each point; last entry closes the loop
    cumulative: Vec<f64>,
    half_width: f64,
    seed: u64,
    min_curvature_radius: f64,
}

impl Track {
    /// Generate the track described by `config`
    pub fn generate(config: &TrackConfig) -> Result<Self, ConfigError> {
        require_positive("half_width", config.half_width)?;
        require_positive("sample_spacing", config.sample_spacing)?;
        let spacing = config.sample_spacing;
        let min_radius = config.min_curvature_radius;

        let track = match &config.shape {
            TrackShape::Circle { radius } => {
                require_positive("radius", *radius)?;
                let points = sample_closed(TAU * radius, spacing, |t| {
                    polar_to_cartesian(*radius, -PI / 2.0 + TAU * t)
                });
                Self::from_centerline(points, config.half_width, min_radius, config.track_seed)?
            }
            TrackShape::Ellipse {
                semi_major,
                semi_minor,
            } => {
                require_positive("semi_major", *semi_major)?;
                require_positive("semi_minor", *semi_minor)?;
                let (a, b) = (*semi_major, *semi_minor);
                // Ramanujan's perimeter approximation is plenty for choosing a sample count
                let h = ((a - b) / (a + b)).powi(2);
                let perimeter = PI * (a + b) * (1.0 + 3.0 * h / (10.0 + (4.0 - 3.0 * h).sqrt()));
                let points = sample_closed(perimeter, spacing, |t| {
                    let theta = -PI / 2.0 + TAU * t;
                    DVec2::new(a * theta.cos(), b * theta.sin())
                });
                Self::from_centerline(points, config.half_width, min_radius, config.track_seed)?
            }
            TrackShape::Stadium {
                straight_length,
                radius,
            } => {
                require_positive("straight_length", *straight_length)?;
                require_positive("radius", *radius)?;
                let total = 2.0 * straight_length + TAU * radius;
                let points = sample_closed(total, spacing, |t| {
                    stadium_point(*straight_length, *radius, t * total)
                });
                Self::from_centerline(points, config.half_width, min_radius, config.track_seed)?
            }
            TrackShape::Random {
                base_radius,
                harmonics,
                amplitude,
            } => generate_random(
                *base_radius,
                *harmonics,
                *amplitude,
                config.half_width,
                min_radius,
                spacing,
                config.track_seed,
            )?
            .0,
            TrackShape::Waypoints { points } => {
                let waypoints: Vec<DVec2> =
                    points.iter().map(|p| DVec2::new(p[0], p[1])).collect();
                let points = catmull_rom_loop(&waypoints, spacing)?;
                Self::from_centerline(points, config.half_width, min_radius, config.track_seed)?
            }
        };

        debug!(
            "Generated track: {} points, length {:.3} m, min curvature radius {:.3} m",
            track.points.len(),
            track.length(),
            track.min_curvature_radius
        );
        Ok(track)
    }

    /// Build a track from an explicit closed centerline (last point connects to the first)
    pub fn from_centerline(
        points: Vec<DVec2>,
        half_width: f64,
        min_curvature_radius: f64,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        require_positive("half_width", half_width)?;
        if !min_curvature_radius.is_finite() || min_curvature_radius < 0.0 {
            return Err(ConfigError::invalid(
                "min_curvature_radius",
                format!("must be finite and non-negative, got {min_curvature_radius}"),
            ));
        }

        let points = dedup_points(points);
        if points.iter().any(|p| !p.is_finite()) {
            return Err(ConfigError::DegenerateTrack(
                "centerline contains non-finite points".into(),
            ));
        }
        if points.len() < 3 {
            return Err(ConfigError::DegenerateTrack(format!(
                "need at least 3 distinct centerline points, got {}",
                points.len()
            )));
        }

        let mut cumulative = Vec::with_capacity(points.len() + 1);
        let mut total = 0.0;
        cumulative.push(0.0);
        for i in 0..points.len() {
            total += (points[(i + 1) % points.len()] - points[i]).length();
            cumulative.push(total);
        }
        if total <= f64::EPSILON {
            return Err(ConfigError::DegenerateTrack("centerline has zero length".into()));
        }

        let curvature = min_curvature(&points);
        let minimum = min_curvature_radius.max(half_width);
        if curvature < minimum {
            return Err(ConfigError::TrackTooTight {
                radius: curvature,
                minimum,
            });
        }
        check_clearance(&points, &cumulative, half_width)?;

        Ok(Self {
            points,
            cumulative,
            half_width,
            seed,
            min_curvature_radius: curvature,
        })
    }

    /// Total loop length (metres)
    #[inline]
    pub fn length(&self) -> f64 {
        self.cumulative[self.points.len()]
    }

    /// Half of the drivable band's width
    #[inline]
    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    /// Seed the track was generated with
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Centerline samples (start line first)
    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    /// Tightest curvature radius found on the centerline
    pub fn min_curvature_radius(&self) -> f64 {
        self.min_curvature_radius
    }

    /// Distance beyond which `lateral_offset` returns the sentinel
    #[inline]
    pub fn influence_radius(&self) -> f64 {
        self.half_width * INFLUENCE_HALF_WIDTHS
    }

    /// Nearest point on the centerline. Ties go to the lowest segment index.
    pub fn project(&self, point: DVec2) -> Projection {
        let n = self.points.len();
        let mut best = Projection {
            arc_length: 0.0,
            signed_distance: f64::INFINITY,
            segment: 0,
        };
        let mut best_dist_sq = f64::INFINITY;

        for i in 0..n {
            let a = self.points[i];
            let ab = self.points[(i + 1) % n] - a;
            let seg_len_sq = ab.length_squared();
            let t = ((point - a).dot(ab) / seg_len_sq).clamp(0.0, 1.0);
            let closest = a + ab * t;
            let dist_sq = (point - closest).length_squared();

            if dist_sq < best_dist_sq {
                best_dist_sq = dist_sq;
                let side = if ab.perp_dot(point - a) >= 0.0 { 1.0 } else { -1.0 };
                best = Projection {
                    arc_length: self.cumulative[i] + t * seg_len_sq.sqrt(),
                    signed_distance: side * dist_sq.sqrt(),
                    segment: i,
                };
            }
        }
        best
    }

    /// Signed perpendicular distance to the centerline (positive = left of travel)
    ///
    /// Returns `±OFF_TRACK_SENTINEL` for non-finite points and points outside
    /// every segment's influence.
    pub fn lateral_offset(&self, point: DVec2) -> f64 {
        if !point.is_finite() {
            return OFF_TRACK_SENTINEL;
        }
        let offset = self.project(point).signed_distance;
        if offset.abs() > self.influence_radius() {
            OFF_TRACK_SENTINEL.copysign(offset)
        } else {
            offset
        }
    }

    /// Normalized arc-length position in [0, 1), wrapping at the start line
    pub fn progress(&self, point: DVec2) -> f64 {
        if !point.is_finite() {
            return 0.0;
        }
        self.fraction(self.project(point).arc_length)
    }

    /// True when `point` lies inside the drivable band
    pub fn contains(&self, point: DVec2) -> bool {
        self.lateral_offset(point).abs() <= self.half_width
    }

    /// Centerline position and travel heading at `arc_length` metres from the start
    pub fn pose_at(&self, arc_length: f64) -> (DVec2, f64) {
        let n = self.points.len();
        let s = arc_length.rem_euclid(self.length());
        // First cumulative entry strictly greater than s closes the segment holding it
        let i = self.cumulative.partition_point(|&c| c <= s).saturating_sub(1).min(n - 1);
        let a = self.points[i];
        let ab = self.points[(i + 1) % n] - a;
        let seg_len = self.cumulative[i + 1] - self.cumulative[i];
        let t = ((s - self.cumulative[i]) / seg_len).clamp(0.0, 1.0);
        (a + ab * t, ab.y.atan2(ab.x))
    }

    /// Start line position and heading
    pub fn start_pose(&self) -> (DVec2, f64) {
        self.pose_at(0.0)
    }

    fn fraction(&self, arc_length: f64) -> f64 {
        let frac = arc_length / self.length();
        if frac >= 1.0 || frac < 0.0 {
            frac.rem_euclid(1.0).min(1.0 - f64::EPSILON)
        } else {
            frac
        }
    }
}

/// Sample a closed curve `f(t)`, t in [0, 1), at roughly `spacing` metres
fn sample_closed(length: f64, spacing: f64, f: impl Fn(f64) -> DVec2) -> Vec<DVec2> {
    let n = ((length / spacing).ceil() as usize).max(MIN_SAMPLES);
    (0..n).map(|i| f(i as f64 / n as f64)).collect()
}

/// Point at arc length `s` on a stadium whose start is the middle of the bottom straight
fn stadium_point(straight: f64, radius: f64, s: f64) -> DVec2 {
    let half = straight / 2.0;
    let arc = PI * radius;

    if s < half {
        return DVec2::new(s, -radius);
    }
    let s = s - half;
    if s < arc {
        let theta = -PI / 2.0 + s / radius;
        return DVec2::new(half, 0.0) + polar_to_cartesian(radius, theta);
    }
    let s = s - arc;
    if s < straight {
        return DVec2::new(half - s, radius);
    }
    let s = s - straight;
    if s < arc {
        let theta = PI / 2.0 + s / radius;
        return DVec2::new(-half, 0.0) + polar_to_cartesian(radius, theta);
    }
    let s = s - arc;
    DVec2::new(-half + s, -radius)
}

fn generate_random(
    base_radius: f64,
    harmonics: u32,
    amplitude: f64,
    half_width: f64,
    min_radius: f64,
    spacing: f64,
    seed: u64,
) -> Result<(Track, u32), ConfigError> {
    require_positive("base_radius", base_radius)?;
    if !(0.0..1.0).contains(&amplitude) {
        return Err(ConfigError::invalid(
            "amplitude",
            format!("must be in [0, 1), got {amplitude}"),
        ));
    }

    // Harmonic k gets weight in [-amplitude/k, amplitude/k] and a random phase
    let mut rng = Pcg32::seed_from_u64(seed);
    let terms: Vec<(f64, f64, f64)> = (0..harmonics)
        .map(|i| {
            let k = f64::from(i + 2);
            let weight = rng.random_range(-1.0..=1.0) * amplitude / k;
            let phase = rng.random_range(0.0..TAU);
            (k, weight, phase)
        })
        .collect();

    let mut scale = 1.0;
    let mut last_err = None;
    for attempt in 0..RANDOM_SHAPE_ATTEMPTS {
        let radius_at = |theta: f64| {
            let wobble: f64 = terms
                .iter()
                .map(|(k, w, phase)| w * scale * (k * theta + phase).cos())
                .sum();
            base_radius * (1.0 + wobble)
        };
        let points = sample_closed(TAU * base_radius * 1.3, spacing, |t| {
            let theta = -PI / 2.0 + TAU * t;
            polar_to_cartesian(radius_at(theta), theta)
        });

        match Track::from_centerline(points, half_width, min_radius, seed) {
            Ok(track) => return Ok((track, attempt)),
            Err(err) => {
                debug!("Random track attempt {attempt} rejected: {err}");
                last_err = Some(err);
                scale *= 0.5;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ConfigError::DegenerateTrack("no attempts made".into())))
}

/// Closed centripetal Catmull-Rom spline through `waypoints`
fn catmull_rom_loop(waypoints: &[DVec2], spacing: f64) -> Result<Vec<DVec2>, ConfigError> {
    let n = waypoints.len();
    if n < 3 {
        return Err(ConfigError::DegenerateTrack(format!(
            "need at least 3 waypoints, got {n}"
        )));
    }
    if waypoints.iter().any(|p| !p.is_finite()) {
        return Err(ConfigError::DegenerateTrack("waypoints must be finite".into()));
    }
    for i in 0..n {
        if (waypoints[(i + 1) % n] - waypoints[i]).length() < 1e-9 {
            return Err(ConfigError::DegenerateTrack(format!(
                "waypoints {i} and {} coincide",
                (i + 1) % n
            )));
        }
    }

    let mut points = Vec::new();
    for i in 0..n {
        let p0 = waypoints[(i + n - 1) % n];
        let p1 = waypoints[i];
        let p2 = waypoints[(i + 1) % n];
        let p3 = waypoints[(i + 2) % n];
        let steps = (((p2 - p1).length() / spacing).ceil() as usize).max(1);
        for j in 0..steps {
            points.push(catmull_rom(p0, p1, p2, p3, j as f64 / steps as f64));
        }
    }
    Ok(points)
}

/// Barry-Goldman evaluation of a centripetal (alpha = 0.5) segment between p1 and p2
fn catmull_rom(p0: DVec2, p1: DVec2, p2: DVec2, p3: DVec2, u: f64) -> DVec2 {
    let knot = |a: DVec2, b: DVec2| (b - a).length().sqrt().max(1e-9);
    let t0 = 0.0;
    let t1 = t0 + knot(p0, p1);
    let t2 = t1 + knot(p1, p2);
    let t3 = t2 + knot(p2, p3);
    let t = t1 + (t2 - t1) * u;

    let a1 = p0 * ((t1 - t) / (t1 - t0)) + p1 * ((t - t0) / (t1 - t0));
    let a2 = p1 * ((t2 - t) / (t2 - t1)) + p2 * ((t - t1) / (t2 - t1));
    let a3 = p2 * ((t3 - t) / (t3 - t2)) + p3 * ((t - t2) / (t3 - t2));
    let b1 = a1 * ((t2 - t) / (t2 - t0)) + a2 * ((t - t0) / (t2 - t0));
    let b2 = a2 * ((t3 - t) / (t3 - t1)) + a3 * ((t - t1) / (t3 - t1));
    b1 * ((t2 - t) / (t2 - t1)) + b2 * ((t - t1) / (t2 - t1))
}

/// Drop consecutive duplicates, including a closing copy of the first point
fn dedup_points(mut points: Vec<DVec2>) -> Vec<DVec2> {
    points.dedup_by(|b, a| (*b - *a).length_squared() < 1e-18);
    while points.len() > 1 {
        let (first, last) = (points[0], points[points.len() - 1]);
        if (last - first).length_squared() < 1e-18 {
            points.pop();
        } else {
            break;
        }
    }
    points
}

/// Smallest circumradius over every three consecutive points
fn min_curvature(points: &[DVec2]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let a = points[(i + n - 1) % n];
            let b = points[i];
            let c = points[(i + 1) % n];
            let cross = (b - a).perp_dot(c - a).abs();
            if cross <= 1e-15 {
                f64::INFINITY
            } else {
                (b - a).length() * (c - b).length() * (c - a).length() / (2.0 * cross)
            }
        })
        .fold(f64::INFINITY, f64::min)
}

/// Reject loops whose band overlaps itself
///
/// Two samples far apart along the loop must stay at least a full band width apart.
fn check_clearance(points: &[DVec2], cumulative: &[f64], half_width: f64) -> Result<(), ConfigError> {
    let n = points.len();
    let total = cumulative[n];
    let min_arc = PI * half_width * 1.05 + (total / n as f64) * 2.0;
    let min_dist_sq = (2.0 * half_width).powi(2);

    for i in 0..n {
        for j in (i + 1)..n {
            let along = cumulative[j] - cumulative[i];
            if along.min(total - along) <= min_arc {
                continue;
            }
            if (points[j] - points[i]).length_squared() < min_dist_sq {
                return Err(ConfigError::DegenerateTrack(format!(
                    "band overlaps itself near ({:.3}, {:.3})",
                    points[i].x, points[i].y
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn circle(radius: f64) -> Track {
        Track::generate(&TrackConfig {
            shape: TrackShape::Circle { radius },
            ..TrackConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_circle_length_and_start() {
        let track = circle(1.0);
        assert!((track.length() - TAU).abs() < 1e-3);

        let (pos, heading) = track.start_pose();
        assert!((pos - DVec2::new(0.0, -1.0)).length() < 1e-9);
        assert!(heading.abs() < 0.01, "heading {heading}");
    }

    #[test]
    fn test_lateral_offset_sign() {
        let track = circle(1.0);
        // Travel is counter-clockwise, so the inside of the circle is on the left
        assert!(track.lateral_offset(DVec2::new(0.0, -0.9)) > 0.0);
        assert!(track.lateral_offset(DVec2::new(0.0, -1.1)) < 0.0);
        assert!((track.lateral_offset(DVec2::new(0.0, -0.9)) - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_lateral_offset_sentinel() {
        let track = circle(1.0);
        assert_eq!(track.lateral_offset(DVec2::new(0.0, -5.0)), -OFF_TRACK_SENTINEL);
        assert_eq!(track.lateral_offset(DVec2::new(f64::NAN, 0.0)), OFF_TRACK_SENTINEL);
        assert!(!track.contains(DVec2::new(0.0, -5.0)));
    }

    #[test]
    fn test_progress_quarters() {
        let track = circle(1.0);
        assert!(track.progress(DVec2::new(0.0, -1.0)) < 1e-6);
        assert!((track.progress(DVec2::new(1.0, 0.0)) - 0.25).abs() < 1e-3);
        assert!((track.progress(DVec2::new(0.0, 1.0)) - 0.5).abs() < 1e-3);
        assert!((track.progress(DVec2::new(-1.0, 0.0)) - 0.75).abs() < 1e-3);
        // Just behind the start line wraps to nearly 1
        let behind = polar_to_cartesian(1.0, -PI / 2.0 - 0.01);
        assert!(track.progress(behind) > 0.99);
    }

    #[test]
    fn test_stadium_geometry() {
        let track = Track::generate(&TrackConfig {
            shape: TrackShape::Stadium {
                straight_length: 4.0,
                radius: 1.0,
            },
            ..TrackConfig::default()
        })
        .unwrap();
        assert!((track.length() - (8.0 + TAU)).abs() < 1e-2);
        let (pos, heading) = track.start_pose();
        assert!((pos - DVec2::new(0.0, -1.0)).length() < 1e-9);
        assert!(heading.abs() < 1e-9);
        // Mid straight the offset is exactly the vertical displacement
        assert!((track.lateral_offset(DVec2::new(1.0, -0.95)) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_random_track_is_deterministic() {
        let config = TrackConfig::default();
        let a = Track::generate(&config).unwrap();
        let b = Track::generate(&config).unwrap();
        assert_eq!(a.points(), b.points());

        let other = Track::generate(&TrackConfig {
            track_seed: config.track_seed + 1,
            ..config
        })
        .unwrap();
        assert_ne!(a.points(), other.points());
    }

    #[test]
    fn test_waypoint_track_passes_through_waypoints() {
        let track = Track::generate(&TrackConfig {
            shape: TrackShape::Waypoints {
                points: vec![[0.0, -2.0], [2.0, 0.0], [0.0, 2.0], [-2.0, 0.0]],
            },
            ..TrackConfig::default()
        })
        .unwrap();
        assert!(track.lateral_offset(DVec2::new(2.0, 0.0)).abs() < 1e-6);
        assert!(track.lateral_offset(DVec2::new(-2.0, 0.0)).abs() < 1e-6);
    }

    #[test]
    fn test_too_tight_track_rejected() {
        let result = Track::generate(&TrackConfig {
            shape: TrackShape::Circle { radius: 0.1 },
            ..TrackConfig::default()
        });
        assert!(matches!(result, Err(ConfigError::TrackTooTight { .. })));
    }

    #[test]
    fn test_degenerate_centerline_rejected() {
        let result = Track::from_centerline(
            vec![DVec2::ZERO, DVec2::ZERO, DVec2::new(1.0, 0.0)],
            0.1,
            0.0,
            0,
        );
        assert!(matches!(result, Err(ConfigError::DegenerateTrack(_))));
    }

    #[test]
    fn test_random_track_halves_amplitude_until_it_fits() {
        // Eight strong harmonics bend far tighter than 0.3 m at full amplitude
        let (track, attempt) = generate_random(2.0, 8, 0.9, 0.15, 0.3, 0.01, 42).unwrap();
        assert!(attempt > 0);
        assert!(attempt < RANDOM_SHAPE_ATTEMPTS);
        assert!(track.min_curvature_radius() >= 0.3);

        let (again, again_attempt) = generate_random(2.0, 8, 0.9, 0.15, 0.3, 0.01, 42).unwrap();
        assert_eq!(again_attempt, attempt);
        assert_eq!(again.points(), track.points());
    }

    #[test]
    fn test_random_track_gives_up_after_last_attempt() {
        // The base circle alone is already tighter than the minimum radius
        let result = Track::generate(&TrackConfig {
            shape: TrackShape::Random {
                base_radius: 0.2,
                harmonics: 3,
                amplitude: 0.1,
            },
            ..TrackConfig::default()
        });
        assert!(matches!(
            result,
            Err(ConfigError::TrackTooTight { .. } | ConfigError::DegenerateTrack(_))
        ));
    }

    #[test]
    fn test_pose_at_wraps() {
        let track = circle(1.0);
        let (a, _) = track.pose_at(0.5);
        let (b, _) = track.pose_at(0.5 + track.length());
        assert!((a - b).length() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_circle_progress_in_range(theta in -PI..PI, r in 0.9f64..1.1) {
            let track = circle(1.0);
            let p = polar_to_cartesian(r, theta);
            let progress = track.progress(p);
            prop_assert!((0.0..1.0).contains(&progress));
        }

        #[test]
        fn prop_circle_offset_matches_radius(theta in -PI..PI, r in 0.8f64..1.2) {
            let track = circle(1.0);
            let offset = track.lateral_offset(polar_to_cartesian(r, theta));
            prop_assert!((offset - (1.0 - r)).abs() < 1e-3);
        }
    }
}
