pub mod controller;

pub use controller::RewardsController;
