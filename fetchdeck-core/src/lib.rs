pub mod client;
pub mod completion;
pub mod config;
pub mod error;
pub mod poller;
pub mod projector;
pub mod session;
mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{HttpJobClient, JobClient, suggested_filename};
pub use completion::{CompletionHandler, DirectorySaver, SaveTrigger, SavedArtifact};
pub use config::Config;
pub use error::{JobError, SubmitFailure};
pub use poller::{PollSink, PollerPhase, StatusPoller, TickControl};
pub use projector::project;
pub use session::JobSession;
pub use types::{
    Artifact, DerivedUiState, Job, JobId, JobParameters, JobState, MediaKind, Observation,
    SessionEvent, StatusSnapshot,
};
