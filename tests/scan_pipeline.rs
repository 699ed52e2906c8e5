use corridor_scout_lib::coords::RoutePoint;
use corridor_scout_lib::geocoding::GeocodeProvider;
use corridor_scout_lib::route::offset_point;
use corridor_scout_lib::scanner::{ScanPlan, ScanRequest};
use corridor_scout_lib::testing::{detail_page, raw_listing, FakeFetcher, FakeGeocoder, FakeListings};
use corridor_scout_lib::{ScanEvent, Scout, ScoutConfig, ScoutError, Terminal};
use std::sync::Arc;
use std::time::Duration;

fn route() -> Vec<RoutePoint> {
    vec![RoutePoint::new(9.10, 48.70), RoutePoint::new(9.30, 48.75)]
}

fn request() -> ScanRequest {
    ScanRequest::new(route(), "fahrrad", 5000.0, 2000.0)
}

/// 在路线中点垂直偏移处放一条广告
fn listing_at(fetcher: &FakeFetcher, id: &str, offset_m: f64) -> corridor_scout_lib::listings::RawListing {
    let r = route();
    let p = offset_point(r[0], r[1], 0.5, offset_m);
    let listing = raw_listing(id, "100 € VB");
    fetcher.add_page(&listing.url, &detail_page(&format!("Fahrrad {}", id), "100", p.lat, p.lon));
    listing
}

fn scout(geocoder: FakeGeocoder, listings: FakeListings, fetcher: FakeFetcher) -> Scout {
    let providers: Vec<Arc<dyn GeocodeProvider>> = vec![Arc::new(geocoder)];
    Scout::with_components(ScoutConfig::default(), providers, Arc::new(listings), Arc::new(fetcher))
}

fn accepted_ids(events: &[ScanEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Listing(l) => Some(l.listing.listing.id.clone()),
            _ => None,
        })
        .collect()
}

fn terminal(events: &[ScanEvent]) -> Terminal {
    let terminals: Vec<&ScanEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1, "恰好一个终止事件: {:?}", events);
    assert!(events.last().unwrap().is_terminal());
    match terminals[0] {
        ScanEvent::Finished(t) => t.clone(),
        _ => unreachable!(),
    }
}

fn progress(events: &[ScanEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_corridor_filter_on_reference_route() {
    let fetcher = FakeFetcher::new();
    let near = listing_at(&fetcher, "near", 1500.0);
    let far = listing_at(&fetcher, "far", 5000.0);

    let scout = scout(
        FakeGeocoder::new("geo").with_area("72622"),
        FakeListings::new().with_area("72622", vec![near, far]),
        fetcher,
    );
    let events = scout.start(request()).unwrap().collect().await;

    assert_eq!(terminal(&events), Terminal::Done);
    assert_eq!(accepted_ids(&events), vec!["near".to_string()]);

    let accepted = scout.accepted();
    assert_eq!(accepted.len(), 1);
    assert!(accepted[0].distance_m <= 2000.0);
    assert!((accepted[0].distance_m - 1500.0).abs() < 100.0);

    let clusters = scout.clusters();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].members.len(), 1);
    assert_eq!(clusters[0].members[0].url, accepted[0].listing.url());
    assert_eq!(clusters[0].members[0].title, "Fahrrad near");
    assert_eq!(clusters[0].members[0].price, "100 €");

    let p = progress(&events);
    assert!(p.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(p.last(), Some(&100));

    assert_eq!(scout.stats().runs_started, 1);
    assert_eq!(scout.stats().listings_found, 1);
}

#[tokio::test]
async fn test_listing_seen_in_several_areas_is_emitted_once() {
    let fetcher = FakeFetcher::new();
    let shared = listing_at(&fetcher, "shared", 300.0);

    let plan = ScanPlan::prepare(&request());
    assert!(plan.samples.len() >= 2);
    let mut geocoder = FakeGeocoder::new("geo");
    let mut listings = FakeListings::new();
    for sample in &plan.samples {
        let code = format!("7{:04}", sample.index);
        geocoder = geocoder.with_area_at(sample.point.lat, sample.point.lon, &code);
        listings = listings.with_area(&code, vec![shared.clone()]);
    }

    let scout = scout(geocoder, listings, fetcher.clone());
    let events = scout.start(request()).unwrap().collect().await;

    assert_eq!(terminal(&events), Terminal::Done);
    assert_eq!(accepted_ids(&events), vec!["shared".to_string()]);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_new_run_supersedes_running_one() {
    let fetcher = FakeFetcher::new();
    let near = listing_at(&fetcher, "near", 500.0);

    let scout = scout(
        FakeGeocoder::new("geo").with_area("72622"),
        FakeListings::new()
            .with_area("72622", vec![near])
            .with_delay(Duration::from_millis(200)),
        fetcher,
    );

    let first = scout.start(request()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = scout.start(request()).unwrap();
    assert!(second.generation() > first.generation());

    let first_events = first.collect().await;
    assert_eq!(first_events, vec![ScanEvent::Finished(Terminal::Aborted)]);

    let second_events = second.collect().await;
    assert_eq!(terminal(&second_events), Terminal::Done);
    assert_eq!(accepted_ids(&second_events), vec!["near".to_string()]);

    assert_eq!(scout.clusters().len(), 1);
    assert_eq!(scout.stats().runs_started, 2);
    assert_eq!(scout.stats().listings_found, 1);
}

#[tokio::test]
async fn test_explicit_cancel_aborts_run() {
    let fetcher = FakeFetcher::new();
    let near = listing_at(&fetcher, "near", 500.0);
    let scout = scout(
        FakeGeocoder::new("geo").with_area("72622"),
        FakeListings::new()
            .with_area("72622", vec![near])
            .with_delay(Duration::from_millis(500)),
        fetcher,
    );

    let handle = scout.start(request()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(scout.cancel_current());

    let events = handle.collect().await;
    assert_eq!(terminal(&events), Terminal::Aborted);
    assert!(accepted_ids(&events).is_empty());
}

#[tokio::test]
async fn test_route_shorter_than_step_finishes_without_samples() {
    let scout = scout(FakeGeocoder::new("geo"), FakeListings::new(), FakeFetcher::new());
    let short = vec![RoutePoint::new(9.10, 48.70), RoutePoint::new(9.11, 48.70)];
    let handle = scout
        .start(ScanRequest::new(short, "fahrrad", 5000.0, 2000.0))
        .unwrap();
    assert_eq!(handle.info().samples, 0);

    let events = handle.collect().await;
    assert_eq!(
        events,
        vec![ScanEvent::Progress(100), ScanEvent::Finished(Terminal::Done)]
    );
}

#[tokio::test]
async fn test_unresolvable_route_reports_error() {
    let scout = scout(FakeGeocoder::new("geo").failing(), FakeListings::new(), FakeFetcher::new());
    let events = scout.start(request()).unwrap().collect().await;
    assert!(matches!(terminal(&events), Terminal::Error(_)));
    assert_eq!(progress(&events).last(), Some(&100));
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let scout = scout(FakeGeocoder::new("geo"), FakeListings::new(), FakeFetcher::new());

    let empty_query = ScanRequest::new(route(), "", 5000.0, 2000.0);
    assert!(matches!(scout.start(empty_query), Err(ScoutError::EmptyQuery)));

    let empty_route = ScanRequest::new(vec![], "fahrrad", 5000.0, 2000.0);
    assert!(matches!(scout.start(empty_route), Err(ScoutError::EmptyRoute)));

    let bad_step = ScanRequest::new(route(), "fahrrad", 0.0, 2000.0);
    assert!(matches!(scout.start(bad_step), Err(ScoutError::InvalidInput(_))));

    assert_eq!(scout.stats().runs_started, 0);
}

#[tokio::test]
async fn test_detail_limit_per_sample_leaves_rest_for_later_samples() {
    let fetcher = FakeFetcher::new().with_delay(Duration::from_millis(10));
    let listings: Vec<_> = (0..25)
        .map(|i| listing_at(&fetcher, &format!("rad{:02}", i), 500.0))
        .collect();

    let mut config = ScoutConfig::default();
    config.worker_count = 1;
    let (limit, batch) = (config.detail_limit, config.detail_batch);
    assert_eq!((limit, batch), (10, 4));

    let plan = ScanPlan::prepare(&request());
    assert_eq!(plan.samples.len(), 3);

    let providers: Vec<Arc<dyn GeocodeProvider>> =
        vec![Arc::new(FakeGeocoder::new("geo").with_area("72622"))];
    let scout = Scout::with_components(
        config,
        providers,
        Arc::new(FakeListings::new().with_area("72622", listings)),
        Arc::new(fetcher.clone()),
    );
    let events = scout.start(request()).unwrap().collect().await;
    assert_eq!(terminal(&events), Terminal::Done);

    // 每个采样点最多补全 detail_limit 条，其余留给同一区域的后续采样点
    let mut per_sample = vec![0usize; plan.samples.len()];
    for event in &events {
        if let ScanEvent::Listing(l) = event {
            per_sample[l.sample_index] += 1;
        }
    }
    assert_eq!(per_sample, vec![limit, limit, 5]);
    assert_eq!(fetcher.calls(), 25);
    assert_eq!(fetcher.peak_in_flight(), batch);
}
