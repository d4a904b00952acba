pub mod victim_tracking;

pub use victim_tracking::{TrackingConfig, TrackingReport, VictimTrackingJob};
