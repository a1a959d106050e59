pub mod app_header;
pub mod crc;
pub mod ota;
pub mod packet;
pub mod version;

pub mod prelude {
    pub use crate::app_header::*;
    pub use crate::crc::*;
    pub use crate::ota::*;
    pub use crate::packet::*;
    pub use crate::version::*;
}
