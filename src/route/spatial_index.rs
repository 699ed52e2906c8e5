//! 路线空间索引
//!
//! 使用 R-tree 存储每段折线的包围盒，查询时只对窗口内的线段做精确
//! 点-线段距离计算；窗口给不出可信结果时改为逐段扫描。无法建树时
//! 始终线性扫描，结果一致。

use crate::coords::{point_segment_distance, LocalProjection, RoutePoint, METERS_PER_DEG_LAT};
use rstar::{RTree, RTreeObject, AABB};

/// 查询窗口半径（度）
pub const WINDOW_DEG: f64 = 0.2;

/// 一段路线
#[derive(Debug, Clone, Copy)]
struct Segment {
    a: RoutePoint,
    b: RoutePoint,
}

impl Segment {
    /// 以查询点纬度做局部投影后的精确距离（米）
    fn distance_m(&self, lon: f64, lat: f64) -> f64 {
        let proj = LocalProjection::at_latitude(lat);
        point_segment_distance(
            proj.project(lon, lat),
            proj.project(self.a.lon, self.a.lat),
            proj.project(self.b.lon, self.b.lat),
        )
    }
}

struct SegmentEntry {
    segment: Segment,
    min: [f64; 2],
    max: [f64; 2],
}

impl RTreeObject for SegmentEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

enum Backend {
    Tree {
        tree: RTree<SegmentEntry>,
        projection: LocalProjection,
    },
    Linear,
}

pub struct SpatialIndex {
    segments: Vec<Segment>,
    backend: Backend,
}

impl SpatialIndex {
    /// 构建索引；坐标非法时自动退化为线性扫描
    pub fn build(route: &[RoutePoint]) -> Self {
        let segments = segments_of(route);

        if segments.is_empty() || route.iter().any(|p| !p.is_finite()) {
            log::warn!("[SpatialIndex] 无法构建 R-tree，使用线性扫描");
            return Self {
                segments,
                backend: Backend::Linear,
            };
        }

        let mean_lat = route.iter().map(|p| p.lat).sum::<f64>() / route.len() as f64;
        let projection = LocalProjection::at_latitude(mean_lat);

        let entries: Vec<SegmentEntry> = segments
            .iter()
            .map(|seg| {
                let pa = projection.project(seg.a.lon, seg.a.lat);
                let pb = projection.project(seg.b.lon, seg.b.lat);
                SegmentEntry {
                    segment: *seg,
                    min: [pa[0].min(pb[0]), pa[1].min(pb[1])],
                    max: [pa[0].max(pb[0]), pa[1].max(pb[1])],
                }
            })
            .collect();

        log::debug!("[SpatialIndex] 已索引 {} 段", entries.len());

        Self {
            segments,
            backend: Backend::Tree {
                tree: RTree::bulk_load(entries),
                projection,
            },
        }
    }

    /// 强制线性扫描
    pub fn linear(route: &[RoutePoint]) -> Self {
        Self {
            segments: segments_of(route),
            backend: Backend::Linear,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self.backend, Backend::Tree { .. })
    }

    /// 点到路线的最短距离（米）
    ///
    /// 窗口内的最近线段只有在不超过窗口覆盖范围时才可信，否则
    /// 窗口外可能有更近的线段，此时改用线性扫描给出精确值。
    pub fn distance_m(&self, lat: f64, lon: f64) -> f64 {
        match &self.backend {
            Backend::Tree { tree, projection } => {
                let [x, y] = projection.project(lon, lat);
                let [dx, dy] = projection.project(WINDOW_DEG, WINDOW_DEG);
                let window = AABB::from_corners([x - dx, y - dy], [x + dx, y + dy]);

                let best = tree
                    .locate_in_envelope_intersecting(&window)
                    .map(|entry| entry.segment.distance_m(lon, lat))
                    .fold(f64::INFINITY, f64::min);

                if best <= window_coverage_m(lat, projection) {
                    best
                } else {
                    self.linear_distance_m(lat, lon)
                }
            }
            Backend::Linear => self.linear_distance_m(lat, lon),
        }
    }

    fn linear_distance_m(&self, lat: f64, lon: f64) -> f64 {
        self.segments
            .iter()
            .map(|seg| seg.distance_m(lon, lat))
            .fold(f64::INFINITY, f64::min)
    }
}

/// 窗口外的线段至少这么远；取查询点纬度与建树纬度中较小的经向尺度
fn window_coverage_m(lat: f64, projection: &LocalProjection) -> f64 {
    let at_point = LocalProjection::at_latitude(lat).project(WINDOW_DEG, 0.0)[0];
    let in_tree = projection.project(WINDOW_DEG, 0.0)[0];
    at_point.min(in_tree).min(WINDOW_DEG * METERS_PER_DEG_LAT)
}

fn segments_of(route: &[RoutePoint]) -> Vec<Segment> {
    match route {
        [] => vec![],
        [only] => vec![Segment { a: *only, b: *only }],
        _ => route
            .windows(2)
            .map(|w| Segment { a: w[0], b: w[1] })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::offset_point;
    use proptest::prelude::*;

    fn scenario_route() -> Vec<RoutePoint> {
        vec![RoutePoint::new(9.10, 48.70), RoutePoint::new(9.30, 48.75)]
    }

    #[test]
    fn test_perpendicular_offsets() {
        let route = scenario_route();
        let index = SpatialIndex::build(&route);
        assert!(index.is_indexed());

        let near = offset_point(route[0], route[1], 0.5, 1500.0);
        let far = offset_point(route[0], route[1], 0.5, 5000.0);

        let d_near = index.distance_m(near.lat, near.lon);
        let d_far = index.distance_m(far.lat, far.lon);
        assert!((d_near - 1500.0).abs() < 30.0, "near {}", d_near);
        assert!((d_far - 5000.0).abs() < 80.0, "far {}", d_far);
    }

    #[test]
    fn test_far_point_outside_window_gets_exact_distance() {
        let route = scenario_route();
        let index = SpatialIndex::build(&route);
        let linear = SpatialIndex::linear(&route);
        let d = index.distance_m(50.0, 9.2);
        assert!((d - linear.distance_m(50.0, 9.2)).abs() < 1e-6);
        assert!(d > 130_000.0, "got {}", d);
    }

    #[test]
    fn test_offset_beyond_window_is_not_clamped() {
        // 南北向路线，偏移 25 km 超出 ±0.2° 窗口
        let route = vec![RoutePoint::new(9.20, 48.60), RoutePoint::new(9.20, 48.90)];
        let index = SpatialIndex::build(&route);
        let p = offset_point(route[0], route[1], 0.5, 25_000.0);
        let d = index.distance_m(p.lat, p.lon);
        assert!((d - 25_000.0).abs() < 300.0, "got {}", d);
        assert!(d > 20_000.0);
    }

    #[test]
    fn test_invalid_coordinates_fall_back_to_linear() {
        let route = vec![
            RoutePoint::new(9.10, 48.70),
            RoutePoint::new(f64::NAN, 48.72),
            RoutePoint::new(9.30, 48.75),
        ];
        let index = SpatialIndex::build(&route);
        assert!(!index.is_indexed());
        assert!(index.distance_m(48.70, 9.10) < 1.0);
    }

    #[test]
    fn test_single_point_route() {
        let route = vec![RoutePoint::new(9.10, 48.70)];
        let index = SpatialIndex::build(&route);
        let d = index.distance_m(48.701, 9.10);
        assert!((d - 110.5).abs() < 1.0, "got {}", d);
        assert_eq!(SpatialIndex::build(&[]).distance_m(48.7, 9.1), f64::INFINITY);
    }

    proptest! {
        #[test]
        fn prop_index_matches_linear_and_known_offset(
            lon0 in 5.0f64..15.0,
            lat0 in 45.0f64..54.0,
            dlon in 0.05f64..0.4,
            dlat in -0.2f64..0.2,
            t in 0.1f64..0.9,
            offset in 0.0f64..9000.0,
        ) {
            let a = RoutePoint::new(lon0, lat0);
            let b = RoutePoint::new(lon0 + dlon, lat0 + dlat);
            let route = vec![a, b];
            let indexed = SpatialIndex::build(&route);
            let linear = SpatialIndex::linear(&route);
            let p = offset_point(a, b, t, offset);

            let d_indexed = indexed.distance_m(p.lat, p.lon);
            let d_linear = linear.distance_m(p.lat, p.lon);
            prop_assert!((d_indexed - d_linear).abs() < 1e-6);
            // 局部投影误差随偏移增大，容差 2%
            prop_assert!((d_indexed - offset).abs() <= offset * 0.02 + 5.0,
                "expected {} got {}", offset, d_indexed);
        }
    }
}
