pub mod cache;
pub mod steam_api;

pub use cache::FileWebCache;
pub use steam_api::{SteamWebApi, STEAM_API_KEY};
