pub mod canonical;
pub mod cbor;
pub mod digest;
pub mod error;
pub mod jwk;
pub mod store;

pub use error::{Result, SigilError};
