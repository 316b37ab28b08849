pub mod context;
pub mod errors;

pub use context::AppContext;
pub use errors::AppError;
