pub mod allocator;
pub mod controller;
pub mod engines;
pub mod merkle;

pub use controller::DistributorController;
