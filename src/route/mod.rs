//! 路线几何：解析、加密、采样与空间索引

pub mod sampler;
pub mod spatial_index;

pub use sampler::{RouteSample, RouteSampler};
pub use spatial_index::SpatialIndex;

use crate::coords::{decode_polyline, equirectangular_m, LocalProjection, RoutePoint};
use serde_json::Value;

/// 从 GeoJSON 解析路线坐标
///
/// 支持 LineString / MultiLineString 几何、Feature、FeatureCollection
/// （取第一个线要素）以及裸坐标数组 `[[lon, lat], ...]`。
pub fn parse_geojson_route(value: &Value) -> Option<Vec<RoutePoint>> {
    match value.get("type").and_then(|t| t.as_str()) {
        Some("LineString") => coords_array(value.get("coordinates")?),
        Some("MultiLineString") => {
            let mut points = Vec::new();
            for line in value.get("coordinates")?.as_array()? {
                points.extend(coords_array(line)?);
            }
            Some(points)
        }
        Some("Feature") => parse_geojson_route(value.get("geometry")?),
        Some("FeatureCollection") => value
            .get("features")?
            .as_array()?
            .iter()
            .find_map(parse_geojson_route),
        _ => coords_array(value),
    }
}

fn coords_array(value: &Value) -> Option<Vec<RoutePoint>> {
    value
        .as_array()?
        .iter()
        .map(|c| {
            let pair = c.as_array()?;
            Some(RoutePoint::new(pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
        })
        .collect()
}

/// 路线几何输入：GeoJSON 或编码折线
pub fn parse_route(input: &str) -> Option<Vec<RoutePoint>> {
    let trimmed = input.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(trimmed).ok()?;
        parse_geojson_route(&value)
    } else {
        decode_polyline(trimmed, 5)
    }
}

/// 插值加密，使相邻点间距不超过 `max_gap_m`
///
/// 路由服务返回的折线有时只有少量顶点，采样前需要加密。
pub fn densify(route: &[RoutePoint], max_gap_m: f64) -> Vec<RoutePoint> {
    if route.len() < 2 || !(max_gap_m > 0.0) {
        return route.to_vec();
    }

    let mut out = Vec::with_capacity(route.len());
    out.push(route[0]);
    for w in route.windows(2) {
        let d = equirectangular_m(w[0], w[1]);
        let steps = (d / max_gap_m).ceil().max(1.0) as usize;
        for i in 1..steps {
            let t = i as f64 / steps as f64;
            out.push(RoutePoint::new(
                w[0].lon + (w[1].lon - w[0].lon) * t,
                w[0].lat + (w[1].lat - w[0].lat) * t,
            ));
        }
        out.push(w[1]);
    }
    out
}

/// 在线段 a→b 的位置 t 处，沿左侧垂直方向偏移 `offset_m` 米得到的点
pub fn offset_point(a: RoutePoint, b: RoutePoint, t: f64, offset_m: f64) -> RoutePoint {
    let base = RoutePoint::new(a.lon + (b.lon - a.lon) * t, a.lat + (b.lat - a.lat) * t);
    let proj = LocalProjection::at_latitude(base.lat);
    let [ax, ay] = proj.project(a.lon, a.lat);
    let [bx, by] = proj.project(b.lon, b.lat);
    let len = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
    if len == 0.0 {
        return base;
    }

    let (nx, ny) = (-(by - ay) / len, (bx - ax) / len);
    let [cx, cy] = proj.project(base.lon, base.lat);
    let unit = proj.project(1.0, 1.0);
    RoutePoint::new(
        (cx + nx * offset_m) / unit[0],
        (cy + ny * offset_m) / unit[1],
    )
}
