pub mod keygen;
pub mod patch;
pub mod sign;
