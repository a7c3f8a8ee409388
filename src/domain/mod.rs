pub mod fields;
pub mod request;

pub use request::{DesiredPlace, ExchangeRequest, NewRequest, Place, RequestStatus};
