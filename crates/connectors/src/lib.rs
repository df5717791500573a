pub mod checkpoint;
pub mod error;
pub mod gmail;
pub mod google_calendar;
pub mod google_contacts;
pub mod google_drive;
mod http;
pub mod onedrive;
pub mod provider;
pub mod registry;

pub use checkpoint::Checkpoint;
pub use error::ProviderError;
pub use provider::{
    content_hash, Change, ExternalAccess, Item, Provider, MAX_FILE_SIZE_BYTES, MAX_ITEMS_PER_PASS,
};
