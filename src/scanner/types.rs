use crate::coords::RoutePoint;
use crate::error::ScoutError;
use crate::listings::{EnrichedListing, ListingQuery};
use serde::{Deserialize, Serialize};

/// 最小采样步长（米）；路线按四分之一步长加密，步长过小会生成海量点
pub const MIN_STEP_M: f64 = 100.0;

/// 一次扫描的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub route: Vec<RoutePoint>,
    pub query: String,
    /// 采样步长（米）
    pub step_m: f64,
    /// 走廊半径（米）
    pub corridor_m: f64,
    #[serde(default)]
    pub min_price: Option<u32>,
    #[serde(default)]
    pub max_price: Option<u32>,
}

impl ScanRequest {
    pub fn new(route: Vec<RoutePoint>, query: impl Into<String>, step_m: f64, corridor_m: f64) -> Self {
        Self {
            route,
            query: query.into(),
            step_m,
            corridor_m,
            min_price: None,
            max_price: None,
        }
    }

    pub fn with_price_range(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    pub fn validate(&self) -> Result<(), ScoutError> {
        if self.route.is_empty() {
            return Err(ScoutError::EmptyRoute);
        }
        if self.route.len() < 2 {
            return Err(ScoutError::InvalidInput("路线至少需要两个点".to_string()));
        }
        if self.route.iter().any(|p| !p.is_finite()) {
            return Err(ScoutError::InvalidInput("路线包含无效坐标".to_string()));
        }
        if self.query.trim().is_empty() {
            return Err(ScoutError::EmptyQuery);
        }
        if !(self.step_m.is_finite() && self.step_m >= MIN_STEP_M) {
            return Err(ScoutError::InvalidInput(format!(
                "采样步长无效: {}（至少 {} 米）",
                self.step_m, MIN_STEP_M
            )));
        }
        if !(self.corridor_m.is_finite() && self.corridor_m > 0.0) {
            return Err(ScoutError::InvalidInput(format!("走廊半径无效: {}", self.corridor_m)));
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(ScoutError::InvalidInput(format!("价格区间无效: {} > {}", min, max)));
            }
        }
        Ok(())
    }

    /// 列表接口的搜索半径（公里）
    ///
    /// 覆盖走廊，且不小于半个步长，保证相邻采样点的搜索区域衔接。
    pub fn radius_km(&self) -> u32 {
        let meters = self.corridor_m.max(self.step_m / 2.0);
        ((meters / 1000.0).ceil() as u32).max(1)
    }

    pub fn listing_query(&self) -> ListingQuery {
        ListingQuery {
            keywords: self.query.trim().to_string(),
            radius_km: self.radius_km(),
            min_price: self.min_price,
            max_price: self.max_price,
        }
    }
}

/// 通过走廊过滤的广告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedListing {
    pub listing: EnrichedListing,
    pub lat: f64,
    pub lon: f64,
    /// 到路线的距离（米）
    pub distance_m: f64,
    /// 发现它的采样点
    pub sample_index: usize,
    pub cluster_id: usize,
}

/// 聚类成员摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub url: String,
    pub title: String,
    pub price: String,
    pub image: Option<String>,
}

impl From<&EnrichedListing> for ListingSummary {
    fn from(listing: &EnrichedListing) -> Self {
        Self {
            url: listing.url().to_string(),
            title: listing.title.clone(),
            price: listing.price.clone(),
            image: listing.image.clone(),
        }
    }
}

/// 聚类，锚点为第一个成员
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: usize,
    pub lat: f64,
    pub lon: f64,
    /// 按加入顺序
    pub members: Vec<ListingSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub cluster_id: usize,
    pub lat: f64,
    pub lon: f64,
    pub member: ListingSummary,
    pub member_count: usize,
    /// 本次加入新建了聚类
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum Terminal {
    Done,
    Aborted,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum ScanEvent {
    Listing(AcceptedListing),
    Cluster(ClusterUpdate),
    /// 0..=100
    Progress(u8),
    Finished(Terminal),
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Finished(_))
    }
}
