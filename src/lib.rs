pub mod app;
pub mod board;
pub mod explain;
pub mod layout;
pub mod pdf;

pub use app::MarginaliaApp;
