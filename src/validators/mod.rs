pub mod controller;

pub use controller::ValidatorsController;
