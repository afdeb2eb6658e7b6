pub mod memory;
pub mod traits;

pub use traits::{
    InventoryStore, LocalStore, ProfileStore, RemoteGateway, SyncMetadataStore,
};
