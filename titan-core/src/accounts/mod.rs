pub mod index;
pub mod pool;

pub use index::{load_accounts_file, load_index, save_index};
pub use pool::{AccountLease, AccountPool, PoolConfig, ReleaseOutcome, SessionSweep};
