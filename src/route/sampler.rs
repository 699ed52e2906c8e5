//! 沿线采样
//!
//! 按固定步长沿折线累计距离，每当累计值达到步长就输出当前点。

use crate::coords::{equirectangular_m, RoutePoint};
use serde::{Deserialize, Serialize};

/// 路线采样点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteSample {
    /// 扫描顺序中的位置
    pub index: usize,
    pub point: RoutePoint,
}

pub struct RouteSampler<'a> {
    points: &'a [RoutePoint],
    step_m: f64,
}

impl<'a> RouteSampler<'a> {
    pub fn new(points: &'a [RoutePoint], step_m: f64) -> Self {
        Self { points, step_m }
    }

    /// 惰性采样序列，每次调用都从起点重新开始
    pub fn samples(&self) -> Samples<'a> {
        Samples {
            points: self.points,
            step_m: self.step_m,
            cursor: 1,
            accumulated: 0.0,
            emitted: 0,
        }
    }
}

pub struct Samples<'a> {
    points: &'a [RoutePoint],
    step_m: f64,
    cursor: usize,
    accumulated: f64,
    emitted: usize,
}

impl Iterator for Samples<'_> {
    type Item = RouteSample;

    fn next(&mut self) -> Option<Self::Item> {
        if !(self.step_m > 0.0) {
            return None;
        }

        while self.cursor < self.points.len() {
            let prev = self.points[self.cursor - 1];
            let current = self.points[self.cursor];
            self.cursor += 1;

            self.accumulated += equirectangular_m(prev, current);
            if self.accumulated >= self.step_m {
                self.accumulated = 0.0;
                let sample = RouteSample {
                    index: self.emitted,
                    point: current,
                };
                self.emitted += 1;
                return Some(sample);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::densify;

    #[test]
    fn test_short_route_yields_nothing() {
        let route = vec![RoutePoint::new(9.10, 48.70), RoutePoint::new(9.11, 48.70)];
        // 约 735 米，小于步长
        let samples: Vec<_> = RouteSampler::new(&route, 5000.0).samples().collect();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_empty_and_single_point_routes() {
        assert_eq!(RouteSampler::new(&[], 1000.0).samples().count(), 0);
        let single = [RoutePoint::new(9.1, 48.7)];
        assert_eq!(RouteSampler::new(&single, 1000.0).samples().count(), 0);
    }

    #[test]
    fn test_samples_are_evenly_spaced_and_ordered() {
        let route = densify(
            &[RoutePoint::new(9.10, 48.70), RoutePoint::new(9.30, 48.75)],
            100.0,
        );
        let samples: Vec<_> = RouteSampler::new(&route, 5000.0).samples().collect();

        // 路线约 15.8 km
        assert_eq!(samples.len(), 3);
        for (i, s) in samples.iter().enumerate() {
            assert_eq!(s.index, i);
        }
        for pair in samples.windows(2) {
            let d = equirectangular_m(pair[0].point, pair[1].point);
            assert!((d - 5000.0).abs() < 150.0, "spacing {}", d);
        }
    }

    #[test]
    fn test_restartable() {
        let route = densify(
            &[RoutePoint::new(9.10, 48.70), RoutePoint::new(9.30, 48.75)],
            100.0,
        );
        let sampler = RouteSampler::new(&route, 2000.0);
        let first: Vec<_> = sampler.samples().collect();
        let second: Vec<_> = sampler.samples().collect();
        assert_eq!(first, second);
    }
}
