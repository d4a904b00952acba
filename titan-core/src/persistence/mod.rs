pub mod coordinator;
pub mod files;

pub use coordinator::{
    PersistenceCoordinator, PersistencePaths, ShutdownConfig, ShutdownReport, ShutdownStep, StepFailure,
};
