pub mod error;
pub mod kube_store;
pub mod memory;
pub mod recorder;
pub mod store;

pub use error::StoreError;
pub use kube_store::KubeStore;
pub use memory::MemoryStore;
pub use recorder::{EventPublisher, KubeEventPublisher, StoreEventPublisher};
pub use store::{ListParams, ObjectStore, StoreObject, WatchEvent, WatchStream};
