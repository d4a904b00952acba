pub mod scheduler_traits;
pub mod store_traits;

pub use scheduler_traits::{Job, JobContext, JobId, JobOutcome, JobScheduler, Trigger};
pub use store_traits::{BanLookup, RestrictionSource, WebCache};
