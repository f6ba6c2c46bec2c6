pub mod app;
pub mod serve;
pub mod telemetry;

pub use app::run as run_app;
