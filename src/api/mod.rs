pub mod checkin;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod transport;
pub mod types;
pub mod validation;

pub use error::ApiError;
pub use gateway::{ApiGateway, RequestOptions, Timeouts};
