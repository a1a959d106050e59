pub mod api;
pub mod config;
pub mod controller;
pub mod ota;
pub mod radio;
pub mod store;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::controller::*;
    pub use crate::ota::*;
    pub use crate::radio::*;
    pub use crate::store::*;
}
