pub mod backend;
pub mod index;
pub mod store;

pub use backend::{parse_alert_points, parse_reports, HttpBackend, MarkerQuery, QueryError, ReportActions, StaticMarkerQuery};
pub use index::MarkerIndex;
pub use store::{MarkerSnapshot, MarkerStore, RefreshPolicy};
