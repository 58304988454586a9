pub mod handler;
pub mod model;
pub mod types;

pub use handler::create_colorize_router;
pub use model::{AbPredictor, Colorizer, OnnxPredictor};
pub use types::ColorizeResponse;
