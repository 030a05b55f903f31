pub mod assignments;
pub mod body;
pub mod devices;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
