pub mod interact;
pub mod manager;
