pub mod mem;
pub mod sim;
pub mod timeq;
pub mod traffic;
