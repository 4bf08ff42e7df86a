// src/containment.rs
//
// Pure point-in-polygon evaluation. No state, no I/O.
//
// Uses the crossing-number (ray casting) test: cast a ray from the point
// toward increasing latitude and count how many polygon edges it crosses.
// Odd count = inside, even = outside. Zones are a union — the first zone
// containing the point wins and iteration stops.

use tracing::warn;

use crate::types::{GeoPoint, Zone};

/// Ray-cast containment test against a single polygon ring.
///
/// The ring may be open (last vertex != first) — the final edge wraps back
/// to the first vertex. Fewer than 3 vertices can never contain a point.
pub fn point_in_polygon(point: &GeoPoint, polygon: &[GeoPoint]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let lat = point.latitude;
    let lon = point.longitude;
    let n = polygon.len();

    let mut inside = false;
    let mut p1 = polygon[0];

    for i in 1..=n {
        let p2 = polygon[i % n];

        // Only edges whose longitude span brackets the point can be crossed
        if lon > p1.longitude.min(p2.longitude)
            && lon <= p1.longitude.max(p2.longitude)
            && lat <= p1.latitude.max(p2.latitude)
        {
            let crosses = if (p1.longitude - p2.longitude).abs() < f64::EPSILON {
                // Vertical edge in the scan axis — the ray hits it directly
                true
            } else {
                let lat_intersect = (lon - p1.longitude) * (p2.latitude - p1.latitude)
                    / (p2.longitude - p1.longitude)
                    + p1.latitude;
                lat <= lat_intersect
            };

            if crosses {
                inside = !inside;
            }
        }

        p1 = p2;
    }

    inside
}

/// Check a point against a set of zones, short-circuiting on the first
/// match. Zone order is arbitrary; the system treats overlapping zones as
/// a union, not mutually exclusive regions.
///
/// Degenerate zones (fewer than 3 vertices after closure) never contain
/// and are logged rather than treated as fatal.
pub fn is_inside_any<'a>(point: &GeoPoint, zones: &'a [Zone]) -> Option<&'a Zone> {
    for zone in zones {
        if !zone.is_polygon() {
            warn!(
                "Zone {} ({}) has {} vertices — degenerate, treated as never-containing",
                zone.id,
                zone.name,
                zone.vertices.len()
            );
            continue;
        }
        if point_in_polygon(point, &zone.vertices) {
            return Some(zone);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // Vertices follow the (longitude, latitude) ordering used by the zone
    // source; GeoPoint::new takes (latitude, longitude).
    fn bulacan_rect() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(14.65, 120.98),
            GeoPoint::new(14.65, 121.05),
            GeoPoint::new(14.71, 121.05),
            GeoPoint::new(14.71, 120.98),
        ]
    }

    fn zone(id: &str, vertices: Vec<GeoPoint>) -> Zone {
        Zone {
            id: id.to_string(),
            name: id.to_string(),
            vertices,
            is_active: true,
            color_code: "#3388ff".to_string(),
        }
    }

    #[test]
    fn point_inside_rectangle() {
        assert!(point_in_polygon(&GeoPoint::new(14.68, 121.00), &bulacan_rect()));
    }

    #[test]
    fn point_outside_rectangle() {
        assert!(!point_in_polygon(&GeoPoint::new(14.75, 121.10), &bulacan_rect()));
        assert!(!point_in_polygon(&GeoPoint::new(14.68, 120.90), &bulacan_rect()));
        assert!(!point_in_polygon(&GeoPoint::new(14.60, 121.00), &bulacan_rect()));
    }

    #[test]
    fn closed_ring_gives_same_answer() {
        let mut closed = bulacan_rect();
        closed.push(closed[0]);
        assert!(point_in_polygon(&GeoPoint::new(14.68, 121.00), &closed));
        assert!(!point_in_polygon(&GeoPoint::new(14.75, 121.10), &closed));
    }

    #[test]
    fn concave_polygon() {
        // A "C" shape opening to the east; the notch is outside
        let c_shape = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 4.0),
            GeoPoint::new(1.0, 4.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(3.0, 1.0),
            GeoPoint::new(3.0, 4.0),
            GeoPoint::new(4.0, 4.0),
            GeoPoint::new(4.0, 0.0),
        ];
        // In the solid southern band
        assert!(point_in_polygon(&GeoPoint::new(0.5, 2.0), &c_shape));
        // In the notch
        assert!(!point_in_polygon(&GeoPoint::new(2.0, 2.0), &c_shape));
    }

    #[test]
    fn degenerate_polygon_never_contains() {
        let line = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_polygon(&GeoPoint::new(0.5, 0.5), &line));
        assert!(!point_in_polygon(&GeoPoint::new(0.5, 0.5), &[]));
    }

    #[test]
    fn inside_any_matches_first_containing_zone() {
        let zones = vec![
            zone("far", vec![
                GeoPoint::new(40.0, -74.0),
                GeoPoint::new(40.0, -73.0),
                GeoPoint::new(41.0, -73.0),
            ]),
            zone("bulacan", bulacan_rect()),
        ];
        let hit = is_inside_any(&GeoPoint::new(14.68, 121.00), &zones);
        assert_eq!(hit.map(|z| z.id.as_str()), Some("bulacan"));
    }

    #[test]
    fn inside_any_skips_degenerate_zones() {
        let zones = vec![
            zone("broken", vec![GeoPoint::new(14.68, 121.00)]),
            zone("bulacan", bulacan_rect()),
        ];
        let hit = is_inside_any(&GeoPoint::new(14.68, 121.00), &zones);
        assert_eq!(hit.map(|z| z.id.as_str()), Some("bulacan"));
    }

    #[test]
    fn inside_any_none_when_outside_everything() {
        let zones = vec![zone("bulacan", bulacan_rect())];
        assert!(is_inside_any(&GeoPoint::new(14.75, 121.10), &zones).is_none());
    }
}
