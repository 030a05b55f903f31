// Lifecycle services
pub mod assignments;
pub mod devices;

// Best-effort MDM mirror
pub mod soti_mirror;
