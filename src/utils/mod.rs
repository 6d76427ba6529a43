pub mod error;
pub mod logging;

pub use error::{ConnectError, ConnectionExhausted, DeliveryError, ExtractError, MalformedRecord};
