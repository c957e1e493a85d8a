//! Farm area from four tapped boundary points.
//!
//! The area is a planar shoelace sum over the points in radians, scaled by
//! `cos(mean latitude) * R^2` to undo longitude compression. This is accurate
//! for field-sized quadrilaterals and degrades for very large ones.
//!
//! Self-intersecting quadrilaterals (a "bow tie" from tapping corners out of
//! order) are not rejected. The shoelace sum of such a shape cancels partially,
//! so the returned figure is a number but not a meaningful farm area.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Square meters per acre.
pub const SQ_METERS_PER_ACRE: f64 = 4046.86;
/// A boundary is exactly this many taps.
pub const BOUNDARY_POINTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Tap sequence, 1-based.
    pub order: u8,
}

impl BoundaryPoint {
    pub fn new(latitude: f64, longitude: f64, order: u8) -> Self {
        Self {
            latitude,
            longitude,
            order,
        }
    }
}

/// A completed four-point selection. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FarmBoundary {
    points: [BoundaryPoint; BOUNDARY_POINTS],
    area_acres: f64,
}

impl FarmBoundary {
    /// Build from exactly four points; any other count is not computable.
    pub fn from_points(points: &[BoundaryPoint]) -> Option<Self> {
        let mut points: [BoundaryPoint; BOUNDARY_POINTS] = points.try_into().ok()?;
        points.sort_by_key(|p| p.order);
        let area_acres = area_acres(&points);
        Some(Self { points, area_acres })
    }

    pub fn points(&self) -> &[BoundaryPoint] {
        &self.points
    }

    pub fn area_acres(&self) -> f64 {
        self.area_acres
    }
}

/// Area in acres, rounded to 3 decimals.
///
/// Returns `0.0` unless exactly four points are given; callers use that to
/// keep the "continue" action disabled until the boundary is complete.
pub fn area_acres(points: &[BoundaryPoint]) -> f64 {
    if points.len() != BOUNDARY_POINTS {
        return 0.0;
    }

    let mut ordered = points.to_vec();
    ordered.sort_by_key(|p| p.order);

    let signed: f64 = (0..ordered.len())
        .map(|i| {
            let a = &ordered[i];
            let b = &ordered[(i + 1) % ordered.len()];
            a.longitude.to_radians() * b.latitude.to_radians()
                - b.longitude.to_radians() * a.latitude.to_radians()
        })
        .sum::<f64>()
        / 2.0;

    let center_lat =
        ordered.iter().map(|p| p.latitude).sum::<f64>() / ordered.len() as f64;
    let square_meters =
        signed.abs() * center_lat.to_radians().cos() * EARTH_RADIUS_M * EARTH_RADIUS_M;

    round3(square_meters.abs() / SQ_METERS_PER_ACRE)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// One tap-to-select session. Yields a [`FarmBoundary`] on the fourth tap.
#[derive(Clone, Debug, Default)]
pub struct BoundarySelection {
    points: Vec<BoundaryPoint>,
    completed: Option<FarmBoundary>,
}

impl BoundarySelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tap. Taps after completion are ignored until [`reset`](Self::reset).
    pub fn push(&mut self, latitude: f64, longitude: f64) -> Option<&FarmBoundary> {
        if self.completed.is_none() {
            let order = self.points.len() as u8 + 1;
            self.points.push(BoundaryPoint::new(latitude, longitude, order));
            if self.points.len() == BOUNDARY_POINTS {
                self.completed = FarmBoundary::from_points(&self.points);
            }
        }
        self.completed.as_ref()
    }

    pub fn points(&self) -> &[BoundaryPoint] {
        &self.points
    }

    /// Taps still needed to close the boundary.
    pub fn remaining(&self) -> usize {
        BOUNDARY_POINTS.saturating_sub(self.points.len())
    }

    pub fn boundary(&self) -> Option<&FarmBoundary> {
        self.completed.as_ref()
    }

    /// Running area; `0.0` until the selection is complete.
    pub fn area_acres(&self) -> f64 {
        area_acres(&self.points)
    }

    /// Discard all taps and start over.
    pub fn reset(&mut self) {
        self.points.clear();
        self.completed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Corners of a square of `side_m` meters with its south-west corner at (lat, lon).
    fn square(lat: f64, lon: f64, side_m: f64) -> Vec<BoundaryPoint> {
        let dlat = (side_m / EARTH_RADIUS_M).to_degrees();
        let dlon = dlat / lat.to_radians().cos();
        vec![
            BoundaryPoint::new(lat, lon, 1),
            BoundaryPoint::new(lat, lon + dlon, 2),
            BoundaryPoint::new(lat + dlat, lon + dlon, 3),
            BoundaryPoint::new(lat + dlat, lon, 4),
        ]
    }

    #[test]
    fn one_acre_square_near_equator() {
        let side = SQ_METERS_PER_ACRE.sqrt();
        let area = area_acres(&square(0.5, 36.8, side));
        assert!((area - 1.0).abs() < 0.05, "got {area}");
    }

    #[test]
    fn hectare_at_mid_latitude() {
        let area = area_acres(&square(28.6, 77.2, 100.0));
        let expected = 10_000.0 / SQ_METERS_PER_ACRE;
        assert!((area - expected).abs() / expected < 0.05, "got {area}");
    }

    #[test]
    fn fewer_than_four_points_is_zero() {
        let points = square(10.0, 10.0, 50.0);
        assert_eq!(area_acres(&points[..3]), 0.0);
        assert_eq!(area_acres(&[]), 0.0);
    }

    #[test]
    fn more_than_four_points_is_not_computable() {
        let mut points = square(10.0, 10.0, 50.0);
        points.push(BoundaryPoint::new(10.0, 10.0, 5));
        assert_eq!(area_acres(&points), 0.0);
        assert!(FarmBoundary::from_points(&points).is_none());
    }

    #[test]
    fn winding_direction_does_not_matter() {
        let points = square(12.0, 77.0, 80.0);
        let mut reversed = points.clone();
        for (i, p) in reversed.iter_mut().enumerate() {
            p.order = (BOUNDARY_POINTS - i) as u8;
        }
        // Summation order differs, so allow one unit of the rounded place.
        assert!((area_acres(&points) - area_acres(&reversed)).abs() <= 0.0011);
    }

    #[test]
    fn tap_order_is_respected_over_slice_order() {
        let points = square(12.0, 77.0, 80.0);
        let shuffled = vec![points[2], points[0], points[3], points[1]];
        assert_eq!(area_acres(&points), area_acres(&shuffled));
    }

    #[test]
    fn bow_tie_still_returns_a_number() {
        let p = square(5.0, 5.0, 100.0);
        let crossed = vec![
            BoundaryPoint::new(p[0].latitude, p[0].longitude, 1),
            BoundaryPoint::new(p[2].latitude, p[2].longitude, 2),
            BoundaryPoint::new(p[1].latitude, p[1].longitude, 3),
            BoundaryPoint::new(p[3].latitude, p[3].longitude, 4),
        ];
        let area = area_acres(&crossed);
        assert!(area.is_finite());
        assert!(area >= 0.0);
        assert!(area < area_acres(&p));
    }

    #[test]
    fn selection_completes_on_fourth_tap() {
        let corners = square(20.0, 73.0, 60.0);
        let mut selection = BoundarySelection::new();

        for corner in &corners[..3] {
            assert!(selection.push(corner.latitude, corner.longitude).is_none());
            assert_eq!(selection.area_acres(), 0.0);
        }
        assert_eq!(selection.remaining(), 1);

        let boundary = selection
            .push(corners[3].latitude, corners[3].longitude)
            .cloned()
            .unwrap();
        assert_eq!(boundary.points().len(), 4);
        assert_eq!(boundary.area_acres(), area_acres(&corners));

        // A fifth tap does not mutate the finished boundary.
        selection.push(0.0, 0.0);
        assert_eq!(selection.boundary(), Some(&boundary));

        selection.reset();
        assert!(selection.boundary().is_none());
        assert_eq!(selection.remaining(), 4);
    }

    fn arb_point(order: u8) -> impl Strategy<Value = BoundaryPoint> {
        (-60.0f64..60.0, -179.0f64..179.0)
            .prop_map(move |(lat, lon)| BoundaryPoint::new(lat, lon, order))
    }

    fn arb_boundary() -> impl Strategy<Value = Vec<BoundaryPoint>> {
        (arb_point(1), arb_point(2), arb_point(3), arb_point(4))
            .prop_map(|(a, b, c, d)| vec![a, b, c, d])
    }

    proptest! {
        #[test]
        fn area_is_never_negative(points in arb_boundary()) {
            prop_assert!(area_acres(&points) >= 0.0);
        }

        #[test]
        fn area_is_pure(points in arb_boundary()) {
            let first = area_acres(&points);
            let second = area_acres(&points);
            prop_assert_eq!(first.to_bits(), second.to_bits());
        }
    }
}
