pub mod monitor;
pub mod sim;
