pub mod debounce;
pub mod dispatcher;
pub mod notifier;
pub mod proximity;

pub use debounce::AlertDebouncer;
pub use dispatcher::{ActiveAlert, AlertDispatcher, DispatchOutcome};
pub use notifier::{AlertNotifier, HapticPattern, LogNotifier, NotifyCall, NotifyError, RecordingNotifier};
pub use proximity::{evaluate, nearest_within_radius, AlertCandidate};
