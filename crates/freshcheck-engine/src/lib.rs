pub mod acquire;
pub mod analyze;
pub mod config;
pub mod controller;
mod http;
pub mod persist;

pub use acquire::{MediaAcquirer, SelectedFile, StillFrameCamera};
pub use analyze::{AnalysisRequestBuilder, InferenceProvider, InferenceProviderRegistry};
pub use config::Settings;
pub use controller::{AnalysisTicket, ScanController, ScanPhase};
pub use persist::{HistoryPersister, PersistenceError, SaveAck};
