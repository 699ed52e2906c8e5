//! 坐标与距离工具
//! 局部平面投影（等距矩形近似）与 haversine 大圆距离

use serde::{Deserialize, Serialize};

/// 纬度方向每度米数（固定比例）
pub const METERS_PER_DEG_LAT: f64 = 110_540.0;
/// 赤道处经度方向每度米数，按 cos(lat) 修正
pub const METERS_PER_DEG_LON: f64 = 111_320.0;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// 路线上的一个点，(lon, lat) 顺序与 GeoJSON 一致
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lon: f64,
    pub lat: f64,
}

impl RoutePoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

impl From<(f64, f64)> for RoutePoint {
    fn from((lon, lat): (f64, f64)) -> Self {
        Self { lon, lat }
    }
}

/// 两点间等距矩形近似距离（米），用于沿线累计
pub fn equirectangular_m(a: RoutePoint, b: RoutePoint) -> f64 {
    let mean_lat = ((a.lat + b.lat) / 2.0).to_radians();
    let dx = (b.lon - a.lon) * METERS_PER_DEG_LON * mean_lat.cos();
    let dy = (b.lat - a.lat) * METERS_PER_DEG_LAT;
    (dx * dx + dy * dy).sqrt()
}

/// 大圆距离（米）
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// 以参考纬度为基准的局部平面投影
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    lon_scale: f64,
}

impl LocalProjection {
    pub fn at_latitude(lat: f64) -> Self {
        Self {
            lon_scale: METERS_PER_DEG_LON * lat.to_radians().cos(),
        }
    }

    /// 经纬度 -> 平面米坐标 [x, y]
    pub fn project(&self, lon: f64, lat: f64) -> [f64; 2] {
        [lon * self.lon_scale, lat * METERS_PER_DEG_LAT]
    }
}

/// 点到线段距离（平面坐标）
pub fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a[0] + t * dx, a[1] + t * dy);
    ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt()
}

/// 解码 Google/OSRM 编码折线，precision 通常为 5（ORS/OSRM）或 6
pub fn decode_polyline(encoded: &str, precision: u32) -> Option<Vec<RoutePoint>> {
    let factor = 10f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let (mut idx, mut lat, mut lon) = (0usize, 0i64, 0i64);

    while idx < bytes.len() {
        let mut deltas = [0i64; 2];
        for delta in deltas.iter_mut() {
            let (mut shift, mut result) = (0u32, 0i64);
            loop {
                let b = (*bytes.get(idx)? as i64) - 63;
                if !(0..64).contains(&b) || shift > 60 {
                    return None;
                }
                idx += 1;
                result |= (b & 0x1f) << shift;
                shift += 5;
                if b < 0x20 {
                    break;
                }
            }
            *delta = if result & 1 != 0 { !(result >> 1) } else { result >> 1 };
        }
        lat += deltas[0];
        lon += deltas[1];
        points.push(RoutePoint::new(lon as f64 / factor, lat as f64 / factor));
    }

    Some(points)
}
