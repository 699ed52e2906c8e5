//! 结果汇总：去重、走廊过滤、聚类

use super::types::{AcceptedListing, Cluster, ClusterUpdate, ListingSummary};
use crate::cache::SeenSet;
use crate::coords::haversine_m;
use crate::listings::EnrichedListing;
use crate::route::SpatialIndex;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// 聚类半径（米）
pub const CLUSTER_RADIUS_M: f64 = 200.0;

/// 走廊检查结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Inside { lat: f64, lon: f64, distance_m: f64 },
    Outside { distance_m: f64 },
    Unlocated,
}

pub struct ResultAggregator {
    seen: SeenSet<String>,
    index: Arc<SpatialIndex>,
    corridor_m: f64,
    clusters: RwLock<Vec<Cluster>>,
    accepted: Mutex<Vec<AcceptedListing>>,
}

impl ResultAggregator {
    pub fn new(index: Arc<SpatialIndex>, corridor_m: f64) -> Self {
        Self {
            seen: SeenSet::new(),
            index,
            corridor_m,
            clusters: RwLock::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// 首次见到该 URL 时返回 true
    pub fn claim(&self, url: &str) -> bool {
        self.seen.claim(url.to_string())
    }

    pub fn check(&self, listing: &EnrichedListing) -> Verdict {
        let Some((lat, lon)) = listing.coords else {
            return Verdict::Unlocated;
        };
        let distance_m = self.index.distance_m(lat, lon);
        if distance_m <= self.corridor_m {
            Verdict::Inside { lat, lon, distance_m }
        } else {
            Verdict::Outside { distance_m }
        }
    }

    /// 记录通过检查的广告并放入聚类
    pub fn accept(
        &self,
        listing: EnrichedListing,
        lat: f64,
        lon: f64,
        distance_m: f64,
        sample_index: usize,
    ) -> (AcceptedListing, ClusterUpdate) {
        let update = self.add_to_cluster(ListingSummary::from(&listing), lat, lon);
        let accepted = AcceptedListing {
            listing,
            lat,
            lon,
            distance_m,
            sample_index,
            cluster_id: update.cluster_id,
        };
        self.accepted.lock().push(accepted.clone());
        (accepted, update)
    }

    fn add_to_cluster(&self, member: ListingSummary, lat: f64, lon: f64) -> ClusterUpdate {
        let mut clusters = self.clusters.write();

        if let Some(cluster) = clusters
            .iter_mut()
            .find(|c| haversine_m(c.lat, c.lon, lat, lon) <= CLUSTER_RADIUS_M)
        {
            cluster.members.push(member.clone());
            return ClusterUpdate {
                cluster_id: cluster.id,
                lat: cluster.lat,
                lon: cluster.lon,
                member,
                member_count: cluster.members.len(),
                created: false,
            };
        }

        let id = clusters.len();
        clusters.push(Cluster {
            id,
            lat,
            lon,
            members: vec![member.clone()],
        });
        ClusterUpdate {
            cluster_id: id,
            lat,
            lon,
            member,
            member_count: 1,
            created: true,
        }
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.clusters.read().clone()
    }

    pub fn accepted(&self) -> Vec<AcceptedListing> {
        self.accepted.lock().clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{RoutePoint, METERS_PER_DEG_LAT};
    use crate::route::offset_point;
    use crate::testing::raw_listing;

    fn aggregator() -> ResultAggregator {
        let route = vec![RoutePoint::new(9.10, 48.70), RoutePoint::new(9.30, 48.75)];
        ResultAggregator::new(Arc::new(SpatialIndex::build(&route)), 2000.0)
    }

    fn located(id: &str, lat: f64, lon: f64) -> EnrichedListing {
        let mut l = EnrichedListing::unresolved(&raw_listing(id, "10"));
        l.coords = Some((lat, lon));
        l
    }

    #[test]
    fn test_claim_is_insert_if_absent() {
        let agg = aggregator();
        assert!(agg.claim("https://www.kleinanzeigen.de/s-anzeige/a/1"));
        assert!(!agg.claim("https://www.kleinanzeigen.de/s-anzeige/a/1"));
    }

    #[test]
    fn test_check_requires_coordinates() {
        let agg = aggregator();
        let unlocated = EnrichedListing::unresolved(&raw_listing("1", "10"));
        assert_eq!(agg.check(&unlocated), Verdict::Unlocated);
        assert!(matches!(agg.check(&located("2", 48.725, 9.2)), Verdict::Inside { .. }));
        assert!(matches!(agg.check(&located("3", 49.2, 9.2)), Verdict::Outside { .. }));
    }

    #[test]
    fn test_wide_corridor_rejects_points_beyond_it() {
        let route = vec![RoutePoint::new(9.20, 48.60), RoutePoint::new(9.20, 48.90)];
        let agg = ResultAggregator::new(Arc::new(SpatialIndex::build(&route)), 20_000.0);

        let inside = offset_point(route[0], route[1], 0.5, 18_000.0);
        let outside = offset_point(route[0], route[1], 0.5, 25_000.0);
        assert!(matches!(
            agg.check(&located("in", inside.lat, inside.lon)),
            Verdict::Inside { .. }
        ));
        match agg.check(&located("out", outside.lat, outside.lon)) {
            Verdict::Outside { distance_m } => assert!(distance_m > 20_000.0),
            other => panic!("25 km 外的点不应通过: {:?}", other),
        }
    }

    #[test]
    fn test_clustering_by_anchor_distance() {
        let agg = aggregator();
        let (lat, lon) = (48.72, 9.18);
        let near = 150.0 / METERS_PER_DEG_LAT;
        let far = 300.0 / METERS_PER_DEG_LAT;

        let (_, first) = agg.accept(located("1", lat, lon), lat, lon, 10.0, 0);
        assert!(first.created);

        let (_, second) = agg.accept(located("2", lat + near, lon), lat + near, lon, 10.0, 0);
        assert!(!second.created);
        assert_eq!(second.cluster_id, first.cluster_id);
        assert_eq!(second.member_count, 2);
        // 锚点不移动
        assert_eq!((second.lat, second.lon), (lat, lon));

        let (accepted, third) = agg.accept(located("3", lat - far, lon), lat - far, lon, 10.0, 1);
        assert!(third.created);
        assert_ne!(third.cluster_id, first.cluster_id);
        assert_eq!(accepted.cluster_id, third.cluster_id);

        let clusters = agg.clusters();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members.len(), 2);
        assert_eq!(agg.accepted_count(), 3);
    }
}
