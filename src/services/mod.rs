pub mod identity;
pub mod session_manager;
pub mod session_store;
