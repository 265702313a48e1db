use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use crate::models::{DirectionsRequest, DirectionsResponse, Fix, GeoPoint};

pub type RouteFuture = Pin<Box<dyn Future<Output = Result<Vec<GeoPoint>, RouteError>> + Send>>;

/// Routing collaborator: returns the road geometry between two points.
///
/// Implementations must not block; the tracker awaits the returned future on a separate
/// task and drops results that arrive after a newer fix superseded the request.
pub trait RouteProvider: Send + Sync {
    fn route(&self, request: DirectionsRequest) -> RouteFuture;
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("directions request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("directions service answered with status {0}")]
    Status(String),
    #[error("directions path has {0} point(s), at least 2 are required")]
    TooShort(usize),
    #[error("directions request timed out after {0:?}")]
    Timeout(Duration),
    #[error("no directions service configured")]
    Unavailable,
}

/// HTTP directions service speaking [`DirectionsRequest`] / [`DirectionsResponse`].
#[derive(Clone)]
pub struct DirectionsClient {
    client: reqwest::Client,
    url: String,
}

impl DirectionsClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl RouteProvider for DirectionsClient {
    fn route(&self, request: DirectionsRequest) -> RouteFuture {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let response: DirectionsResponse = client
                .post(&url)
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            path_from_response(response)
        })
    }
}

/// Used when no directions service is configured: every hop is animated as a straight line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineOnly;

impl RouteProvider for StraightLineOnly {
    fn route(&self, _request: DirectionsRequest) -> RouteFuture {
        Box::pin(async { Err(RouteError::Unavailable) })
    }
}

pub fn path_from_response(response: DirectionsResponse) -> Result<Vec<GeoPoint>, RouteError> {
    if !response.is_ok() {
        return Err(RouteError::Status(response.status));
    }
    if response.path.len() < 2 {
        return Err(RouteError::TooShort(response.path.len()));
    }
    Ok(response.path)
}

/// Ordered polyline with at least two points.
#[derive(Debug, Clone, PartialEq)]
pub struct WaypointPath(Vec<GeoPoint>);

impl WaypointPath {
    pub fn new(points: Vec<GeoPoint>) -> Option<Self> {
        (points.len() >= 2 && points.iter().all(GeoPoint::is_valid)).then_some(Self(points))
    }

    pub fn into_points(self) -> Vec<GeoPoint> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteTicket(u64);

#[derive(Debug)]
pub struct RouteOutcome {
    pub ticket: RouteTicket,
    pub result: Result<Vec<GeoPoint>, RouteError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Path(WaypointPath),
    NoRoute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingRoute {
    pub ticket: RouteTicket,
    pub previous: Fix,
    pub next: Fix,
}

/// Issues route lookups and decides which answers are still wanted.
pub struct RouteResolver {
    provider: Arc<dyn RouteProvider>,
    timeout: Duration,
    next_ticket: u64,
    pending: Option<PendingRoute>,
}

impl RouteResolver {
    pub fn new(provider: Arc<dyn RouteProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            next_ticket: 0,
            pending: None,
        }
    }

    /// Starts a lookup for `previous -> next`, superseding any pending one.
    ///
    /// The returned future never fails; errors are reported inside the outcome so the
    /// caller can fall back to a straight line.
    pub fn request(
        &mut self,
        previous: Fix,
        next: Fix,
    ) -> impl Future<Output = RouteOutcome> + Send + 'static {
        let ticket = RouteTicket(self.next_ticket);
        self.next_ticket += 1;
        self.pending = Some(PendingRoute {
            ticket,
            previous,
            next,
        });

        let lookup = self
            .provider
            .route(DirectionsRequest::driving(previous.point, next.point));
        let timeout = self.timeout;
        async move {
            let result = match tokio::time::timeout(timeout, lookup).await {
                Ok(result) => result,
                Err(_) => Err(RouteError::Timeout(timeout)),
            };
            RouteOutcome { ticket, result }
        }
    }

    /// Accepts an outcome if it answers the pending request; stale outcomes yield `None`.
    pub fn complete(&mut self, outcome: RouteOutcome) -> Option<(PendingRoute, Resolution)> {
        let pending = self.pending.filter(|p| p.ticket == outcome.ticket)?;
        self.pending = None;

        let resolution = match outcome.result {
            Ok(points) => match WaypointPath::new(points) {
                Some(path) => Resolution::Path(path),
                None => {
                    tracing::debug!("directions path rejected, falling back to straight line");
                    Resolution::NoRoute
                }
            },
            Err(err) => {
                tracing::debug!("no route ({err}), falling back to straight line");
                Resolution::NoRoute
            }
        };
        Some((pending, resolution))
    }

    pub fn pending(&self) -> Option<&PendingRoute> {
        self.pending.as_ref()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FixedRoute(Vec<GeoPoint>);

    impl RouteProvider for FixedRoute {
        fn route(&self, _request: DirectionsRequest) -> RouteFuture {
            let points = self.0.clone();
            Box::pin(async move { Ok(points) })
        }
    }

    struct NeverAnswers;

    impl RouteProvider for NeverAnswers {
        fn route(&self, _request: DirectionsRequest) -> RouteFuture {
            Box::pin(std::future::pending())
        }
    }

    fn fix(sequence: u64, lat: f64, lng: f64) -> Fix {
        Fix {
            point: GeoPoint::new(lat, lng),
            sequence,
            received_at: Utc::now(),
        }
    }

    fn three_points() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(45.0, 5.0),
            GeoPoint::new(45.001, 5.0),
            GeoPoint::new(45.001, 5.001),
        ]
    }

    #[tokio::test]
    async fn path_resolution() {
        let mut resolver = RouteResolver::new(
            Arc::new(FixedRoute(three_points())),
            Duration::from_secs(1),
        );
        let outcome = resolver
            .request(fix(0, 45.0, 5.0), fix(1, 45.001, 5.001))
            .await;
        let (pending, resolution) = resolver.complete(outcome).expect("current ticket");
        assert_eq!(pending.next.sequence, 1);
        assert_eq!(
            resolution,
            Resolution::Path(WaypointPath::new(three_points()).unwrap())
        );
        assert!(resolver.pending().is_none());
    }

    #[tokio::test]
    async fn stale_outcome_is_ignored() {
        let mut resolver = RouteResolver::new(
            Arc::new(FixedRoute(three_points())),
            Duration::from_secs(1),
        );
        let first = resolver.request(fix(0, 45.0, 5.0), fix(1, 45.001, 5.001));
        let second = resolver.request(fix(1, 45.001, 5.001), fix(2, 45.002, 5.002));

        let first = first.await;
        assert!(resolver.complete(first).is_none());

        let second = second.await;
        let (pending, _) = resolver.complete(second).expect("latest ticket");
        assert_eq!(pending.next.sequence, 2);
    }

    #[tokio::test]
    async fn unavailable_provider_means_no_route() {
        let mut resolver = RouteResolver::new(Arc::new(StraightLineOnly), Duration::from_secs(1));
        let outcome = resolver.request(fix(0, 1.0, 1.0), fix(1, 1.1, 1.1)).await;
        let (_, resolution) = resolver.complete(outcome).unwrap();
        assert_eq!(resolution, Resolution::NoRoute);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_means_no_route() {
        let mut resolver = RouteResolver::new(Arc::new(NeverAnswers), Duration::from_secs(10));
        let outcome = resolver.request(fix(0, 1.0, 1.0), fix(1, 1.1, 1.1)).await;
        assert!(matches!(outcome.result, Err(RouteError::Timeout(_))));
        let (_, resolution) = resolver.complete(outcome).unwrap();
        assert_eq!(resolution, Resolution::NoRoute);
    }

    #[tokio::test]
    async fn single_point_path_means_no_route() {
        let mut resolver = RouteResolver::new(
            Arc::new(FixedRoute(vec![GeoPoint::new(1.0, 1.0)])),
            Duration::from_secs(1),
        );
        let outcome = resolver.request(fix(0, 1.0, 1.0), fix(1, 1.1, 1.1)).await;
        assert_eq!(resolver.complete(outcome).unwrap().1, Resolution::NoRoute);
    }

    #[test]
    fn non_ok_status_is_an_error() {
        let response = DirectionsResponse {
            status: "ZERO_RESULTS".into(),
            path: three_points(),
        };
        assert!(matches!(
            path_from_response(response),
            Err(RouteError::Status(status)) if status == "ZERO_RESULTS"
        ));
    }

    #[test]
    fn cancel_drops_pending() {
        let mut resolver = RouteResolver::new(Arc::new(StraightLineOnly), Duration::from_secs(1));
        let _lookup = resolver.request(fix(0, 1.0, 1.0), fix(1, 1.1, 1.1));
        assert!(resolver.pending().is_some());
        resolver.cancel();
        assert!(resolver.pending().is_none());
    }
}
