use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{HaloError, HaloResult};
use crate::geo_math::distance_meters;
use crate::types::{HazardKind, HazardMarker, MarkerSource, Severity};

/// Failures of the hazard backend
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    NetworkTimeout,
    HttpError(u16),
    ParseError(String),
    UnknownError(String),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            QueryError::NetworkTimeout => write!(f, "Network timeout"),
            QueryError::HttpError(code) => write!(f, "HTTP error: {}", code),
            QueryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            QueryError::UnknownError(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QueryError::NetworkTimeout
        } else if let Some(status) = e.status() {
            QueryError::HttpError(status.as_u16())
        } else {
            QueryError::UnknownError(e.to_string())
        }
    }
}

impl From<QueryError> for HaloError {
    fn from(e: QueryError) -> Self {
        HaloError::Query(e.to_string())
    }
}

/// Radius query over alert points and live reports
pub trait MarkerQuery: Send + Sync {
    fn query_nearby(&self, lat: f64, lng: f64, radius_m: f64) -> BoxFuture<'_, Result<Vec<HazardMarker>, QueryError>>;
}

/// Community actions on a report, driven by the user from an active alert
pub trait ReportActions: Send + Sync {
    fn upvote<'a>(&'a self, report_id: &'a str) -> BoxFuture<'a, Result<(), QueryError>>;

    /// Removes the report from future query results
    fn resolve<'a>(&'a self, report_id: &'a str) -> BoxFuture<'a, Result<(), QueryError>>;
}

// ============================================================================
// Backend documents
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawLocation {
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlertPoint {
    #[serde(alias = "_id")]
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    location: Option<RawLocation>,
    speed_limit: Option<f64>,
    alert_distance: Option<f64>,
    severity: Option<String>,
    description: Option<String>,
    is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    #[serde(alias = "_id")]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    location: Option<RawLocation>,
    speed_limit: Option<f64>,
    upvotes: Option<u32>,
    verified: Option<bool>,
    expires_at: Option<String>,
}

/// `location.coordinates` is GeoJSON order `[lng, lat]`; flat `lat`/`lng`
/// fields are the fallback
fn resolve_position(location: Option<&RawLocation>, lat: Option<f64>, lng: Option<f64>) -> Option<(f64, f64)> {
    if let Some(loc) = location {
        if let [lng, lat, ..] = loc.coordinates.as_slice() {
            return Some((*lat, *lng));
        }
    }
    Some((lat?, lng?))
}

fn synthetic_id(lat: f64, lng: f64) -> String {
    format!("{}-{}", lat, lng)
}

fn speed_limit_kmh(raw: Option<f64>) -> Option<u32> {
    raw.filter(|v| v.is_finite() && *v > 0.0).map(|v| v.round() as u32)
}

/// Pull the document list out of a response body: a bare array, or an
/// object wrapping one under `key` or `data`
fn documents(body: &str, key: &str) -> Result<Vec<Value>, QueryError> {
    let value: Value = serde_json::from_str(body).map_err(|e| QueryError::ParseError(e.to_string()))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key).or_else(|| map.remove("data")) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(QueryError::ParseError(format!("expected an array of {}", key))),
        },
        _ => Err(QueryError::ParseError(format!("expected an array of {}", key))),
    }
}

fn point_to_marker(raw: RawAlertPoint, default_radius_m: f64) -> Option<HazardMarker> {
    if raw.is_active == Some(false) {
        return None;
    }
    let (lat, lng) = resolve_position(raw.location.as_ref(), raw.lat, raw.lng)?;
    let kind = HazardKind::parse(raw.kind.as_deref().unwrap_or(""));
    let severity = raw
        .severity
        .as_deref()
        .and_then(Severity::parse)
        .unwrap_or_default();

    Some(HazardMarker {
        id: raw.id.unwrap_or_else(|| synthetic_id(lat, lng)),
        kind,
        latitude: lat,
        longitude: lng,
        speed_limit: speed_limit_kmh(raw.speed_limit),
        trigger_radius_m: raw.alert_distance.unwrap_or(default_radius_m),
        severity,
        source: MarkerSource::AlertPoint {
            name: raw.name.unwrap_or_else(|| kind.label().to_string()),
            description: raw.description,
        },
    })
}

fn report_to_marker(raw: RawReport, default_radius_m: f64) -> Option<HazardMarker> {
    let (lat, lng) = resolve_position(raw.location.as_ref(), raw.lat, raw.lng)?;
    let kind = HazardKind::parse(raw.kind.as_deref().unwrap_or(""));
    let expires_at = raw
        .expires_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    Some(HazardMarker {
        id: raw.id.unwrap_or_else(|| synthetic_id(lat, lng)),
        kind,
        latitude: lat,
        longitude: lng,
        speed_limit: speed_limit_kmh(raw.speed_limit),
        trigger_radius_m: default_radius_m,
        severity: kind.default_severity(),
        source: MarkerSource::Report {
            upvotes: raw.upvotes.unwrap_or(0),
            verified: raw.verified.unwrap_or(false),
            expires_at,
        },
    })
}

/// Parse a `/points` response. Documents that do not deserialize or carry no
/// position are skipped; inactive points are dropped.
pub fn parse_alert_points(body: &str, default_radius_m: f64) -> Result<Vec<HazardMarker>, QueryError> {
    let mut markers = Vec::new();
    for doc in documents(body, "points")? {
        match serde_json::from_value::<RawAlertPoint>(doc) {
            Ok(raw) => markers.extend(point_to_marker(raw, default_radius_m)),
            Err(e) => log::warn!("Skipping malformed alert point: {}", e),
        }
    }
    Ok(markers)
}

/// Parse a `/reports` response. Reports take the default trigger radius and
/// a severity derived from their kind.
pub fn parse_reports(body: &str, default_radius_m: f64) -> Result<Vec<HazardMarker>, QueryError> {
    let mut markers = Vec::new();
    for doc in documents(body, "reports")? {
        match serde_json::from_value::<RawReport>(doc) {
            Ok(raw) => markers.extend(report_to_marker(raw, default_radius_m)),
            Err(e) => log::warn!("Skipping malformed report: {}", e),
        }
    }
    Ok(markers)
}

/// Combine the two halves of a vicinity query, points first. One failing
/// half is tolerated; both failing fails the query.
fn merge_results(
    points: Result<Vec<HazardMarker>, QueryError>,
    reports: Result<Vec<HazardMarker>, QueryError>,
) -> Result<Vec<HazardMarker>, QueryError> {
    match (points, reports) {
        (Ok(mut points), Ok(reports)) => {
            points.extend(reports);
            Ok(points)
        }
        (Ok(points), Err(e)) => {
            log::warn!("Report query failed, using alert points only: {}", e);
            Ok(points)
        }
        (Err(e), Ok(reports)) => {
            log::warn!("Alert point query failed, using reports only: {}", e);
            Ok(reports)
        }
        (Err(points_err), Err(reports_err)) => {
            log::warn!("Report query failed as well: {}", reports_err);
            Err(points_err)
        }
    }
}

// ============================================================================
// HTTP backend
// ============================================================================

/// REST client for the hazard backend
///
/// # Endpoints
/// - `GET {base}/points?lat=&lng=&radius=`: fixed alert points
/// - `GET {base}/reports?lat=&lng=&radius=`: live community reports
/// - `POST {base}/reports/{id}/upvote`, `DELETE {base}/reports/{id}`
///
/// Points and reports are fetched concurrently and merged. Each is searched
/// over at least its configured radius (`points_radius_m`, `reports_radius_m`).
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    points_radius_m: f64,
    reports_radius_m: f64,
    default_radius_m: f64,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, default_radius_m: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("highway-halo/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpBackend {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            points_radius_m: config.points_radius_m,
            reports_radius_m: config.reports_radius_m,
            default_radius_m,
        }
    }

    /// Radii sent for points and reports: the caller's radius, widened to
    /// each endpoint's configured minimum
    fn search_radii(&self, radius_m: f64) -> (f64, f64) {
        (radius_m.max(self.points_radius_m), radius_m.max(self.reports_radius_m))
    }

    async fn get_documents(&self, path: &str, lat: f64, lng: f64, radius_m: f64) -> Result<String, QueryError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("lat", lat), ("lng", lng), ("radius", radius_m)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::HttpError(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    async fn fetch_points(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<HazardMarker>, QueryError> {
        let body = self
            .get_documents("points", lat, lng, self.search_radii(radius_m).0)
            .await?;
        parse_alert_points(&body, self.default_radius_m)
    }

    async fn fetch_reports(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<HazardMarker>, QueryError> {
        let body = self
            .get_documents("reports", lat, lng, self.search_radii(radius_m).1)
            .await?;
        parse_reports(&body, self.default_radius_m)
    }

    async fn send_report_action(&self, request: reqwest::RequestBuilder) -> Result<(), QueryError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(QueryError::HttpError(status.as_u16()))
        }
    }
}

impl MarkerQuery for HttpBackend {
    fn query_nearby(&self, lat: f64, lng: f64, radius_m: f64) -> BoxFuture<'_, Result<Vec<HazardMarker>, QueryError>> {
        Box::pin(async move {
            let (points, reports) =
                future::join(self.fetch_points(lat, lng, radius_m), self.fetch_reports(lat, lng, radius_m)).await;
            merge_results(points, reports)
        })
    }
}

impl ReportActions for HttpBackend {
    fn upvote<'a>(&'a self, report_id: &'a str) -> BoxFuture<'a, Result<(), QueryError>> {
        Box::pin(async move {
            let url = format!("{}/reports/{}/upvote", self.base_url, report_id);
            self.send_report_action(self.client.post(&url)).await
        })
    }

    fn resolve<'a>(&'a self, report_id: &'a str) -> BoxFuture<'a, Result<(), QueryError>> {
        Box::pin(async move {
            let url = format!("{}/reports/{}", self.base_url, report_id);
            self.send_report_action(self.client.delete(&url)).await
        })
    }
}

// ============================================================================
// Static markers
// ============================================================================

#[derive(Debug, Deserialize)]
struct MarkerFile {
    #[serde(default)]
    points: Vec<Value>,
    #[serde(default)]
    reports: Vec<Value>,
}

/// In-memory marker set answering radius queries locally.
///
/// Backs the offline replay and the fallback markers file, and stands in for
/// the backend in tests.
pub struct StaticMarkerQuery {
    markers: Vec<HazardMarker>,
    queries: AtomicUsize,
}

impl StaticMarkerQuery {
    pub fn new(markers: Vec<HazardMarker>) -> Self {
        StaticMarkerQuery {
            markers,
            queries: AtomicUsize::new(0),
        }
    }

    /// Load a markers file in backend document form: either an array of
    /// alert points or `{ "points": [...], "reports": [...] }`
    pub fn from_file(path: &Path, default_radius_m: f64) -> HaloResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;

        let markers = if value.is_array() {
            parse_alert_points(&text, default_radius_m)?
        } else {
            let file: MarkerFile = serde_json::from_value(value)?;
            let mut markers = parse_alert_points(&Value::Array(file.points).to_string(), default_radius_m)?;
            markers.extend(parse_reports(&Value::Array(file.reports).to_string(), default_radius_m)?);
            markers
        };

        log::info!("Loaded {} markers from {}", markers.len(), path.display());
        Ok(Self::new(markers))
    }

    pub fn markers(&self) -> &[HazardMarker] {
        &self.markers
    }

    /// Number of radius queries answered so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl MarkerQuery for StaticMarkerQuery {
    fn query_nearby(&self, lat: f64, lng: f64, radius_m: f64) -> BoxFuture<'_, Result<Vec<HazardMarker>, QueryError>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let nearby = self
            .markers
            .iter()
            .filter(|m| distance_meters(lat, lng, m.latitude, m.longitude) <= radius_m)
            .cloned()
            .collect();
        Box::pin(future::ready(Ok(nearby)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINTS: &str = r#"[
        {
            "_id": "65f1a",
            "name": "Ferozepur Road Camera",
            "type": "Speed Camera",
            "lat": 30.8600959,
            "lng": 75.8610409,
            "location": { "type": "Point", "coordinates": [75.8610409, 30.8600959] },
            "speedLimit": 40,
            "alertDistance": 150,
            "severity": "High",
            "isActive": true
        },
        {
            "_id": "65f1b",
            "name": "Closed school gate",
            "type": "School Zone",
            "lat": 30.87,
            "lng": 75.87,
            "isActive": false
        },
        {
            "name": "Bump near market",
            "type": "speed_breaker",
            "lat": 30.88,
            "lng": 75.88
        },
        {
            "_id": "broken",
            "type": "Speed Camera",
            "lat": 30.9,
            "lng": 75.9,
            "alertDistance": "far"
        },
        {
            "_id": "nowhere",
            "type": "Speed Camera"
        }
    ]"#;

    #[test]
    fn test_parse_alert_points() {
        let markers = parse_alert_points(POINTS, 150.0).unwrap();
        assert_eq!(markers.len(), 2);

        let camera = &markers[0];
        assert_eq!(camera.id, "65f1a");
        assert_eq!(camera.kind, HazardKind::SpeedCamera);
        assert_eq!(camera.speed_limit, Some(40));
        assert_eq!(camera.trigger_radius_m, 150.0);
        assert_eq!(camera.severity, Severity::High);
        assert_eq!(
            camera.source,
            MarkerSource::AlertPoint {
                name: "Ferozepur Road Camera".to_string(),
                description: None
            }
        );

        let bump = &markers[1];
        assert_eq!(bump.kind, HazardKind::SpeedBreaker);
        assert_eq!(bump.id, "30.88-75.88");
        assert_eq!(bump.severity, Severity::Medium);
        assert_eq!(bump.trigger_radius_m, 150.0);
    }

    #[test]
    fn test_parse_reports() {
        let body = r#"[
            {
                "id": "1718000000000",
                "type": "Accident",
                "location": { "type": "Point", "coordinates": [75.85, 30.86] },
                "upvotes": 3,
                "verified": true,
                "expiresAt": "2026-06-01T12:00:00.000Z"
            },
            { "id": "1718000000001", "type": "Road Block", "lat": 30.8, "lng": 75.8 }
        ]"#;
        let markers = parse_reports(body, 120.0).unwrap();
        assert_eq!(markers.len(), 2);

        let accident = &markers[0];
        assert!(accident.is_report());
        assert_eq!(accident.latitude, 30.86);
        assert_eq!(accident.longitude, 75.85);
        assert_eq!(accident.severity, Severity::Critical);
        assert_eq!(accident.trigger_radius_m, 120.0);
        match &accident.source {
            MarkerSource::Report {
                upvotes,
                verified,
                expires_at,
            } => {
                assert_eq!(*upvotes, 3);
                assert!(*verified);
                assert!(expires_at.is_some());
            }
            other => panic!("unexpected source {:?}", other),
        }

        assert_eq!(markers[1].kind, HazardKind::RoadBlock);
    }

    #[test]
    fn test_wrapped_response() {
        let body = r#"{ "success": true, "data": [ { "_id": "a", "type": "Flood", "lat": 1.0, "lng": 2.0 } ] }"#;
        let markers = parse_alert_points(body, 150.0).unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].kind, HazardKind::Flood);

        assert!(matches!(parse_alert_points("{ \"success\": false }", 150.0), Err(QueryError::ParseError(_))));
        assert!(matches!(parse_reports("not json", 150.0), Err(QueryError::ParseError(_))));
    }

    #[test]
    fn test_merge_tolerates_one_failure() {
        let points = parse_alert_points(POINTS, 150.0).unwrap();
        let merged = merge_results(Ok(points.clone()), Err(QueryError::NetworkTimeout)).unwrap();
        assert_eq!(merged.len(), points.len());

        let merged = merge_results(Err(QueryError::HttpError(500)), Ok(points.clone())).unwrap();
        assert_eq!(merged.len(), points.len());

        let failed = merge_results(Err(QueryError::HttpError(500)), Err(QueryError::NetworkTimeout));
        assert_eq!(failed, Err(QueryError::HttpError(500)));
    }

    #[test]
    fn test_query_error_display() {
        let errors = vec![
            QueryError::NetworkTimeout,
            QueryError::HttpError(404),
            QueryError::ParseError("test".to_string()),
            QueryError::UnknownError("unknown".to_string()),
        ];
        for err in errors {
            assert!(!format!("{}", err).is_empty());
            let halo: HaloError = err.into();
            assert!(matches!(halo, HaloError::Query(_)));
        }
    }

    #[test]
    fn test_search_radii_respect_configured_minimums() {
        let config = BackendConfig {
            points_radius_m: 2000.0,
            reports_radius_m: 5000.0,
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(&config, 150.0);
        assert_eq!(backend.search_radii(1500.0), (2000.0, 5000.0));
        assert_eq!(backend.search_radii(8000.0), (8000.0, 8000.0));
    }

    #[tokio::test]
    async fn test_static_query_filters_by_radius() {
        let markers = parse_alert_points(POINTS, 150.0).unwrap();
        let query = StaticMarkerQuery::new(markers);
        let nearby = query.query_nearby(30.8600959, 75.8610409, 1500.0).await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, "65f1a");
        assert_eq!(query.query_count(), 1);
    }

    #[test]
    fn test_marker_file_with_points_and_reports() {
        let path = std::env::temp_dir().join(format!("highway_halo_markers_{}.json", std::process::id()));
        let body = r#"{
            "points": [ { "_id": "p", "type": "Red Light", "lat": 30.0, "lng": 75.0, "alertDistance": 80 } ],
            "reports": [ { "id": "r", "type": "Traffic", "lat": 30.001, "lng": 75.0 } ]
        }"#;
        std::fs::write(&path, body).unwrap();
        let query = StaticMarkerQuery::from_file(&path, 150.0).unwrap();
        let _ = std::fs::remove_file(&path);

        let markers = query.markers();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].trigger_radius_m, 80.0);
        assert!(markers[1].is_report());
    }

    // Requires a running backend
    #[tokio::test]
    #[ignore]
    async fn test_http_backend_integration() {
        let backend = HttpBackend::new(&BackendConfig::default(), 150.0);
        match backend.query_nearby(30.8600959, 75.8610409, 1500.0).await {
            Ok(markers) => println!("Fetched {} markers", markers.len()),
            Err(e) => println!("Backend unavailable: {}", e),
        }
    }
}
