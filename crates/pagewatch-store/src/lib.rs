pub mod atomic;
pub mod config;
pub mod events;
pub mod store;

pub use config::StoreConfig;
pub use events::EventLog;
pub use store::FsStore;
