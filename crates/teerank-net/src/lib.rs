pub mod addr;
pub mod error;
pub mod packet;
pub mod unpack;

pub use error::{PacketError, UnpackError};
