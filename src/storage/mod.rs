pub mod file_manager;
pub mod resource_store;

pub use file_manager::FileManager;
pub use resource_store::LocalResourceStore;
