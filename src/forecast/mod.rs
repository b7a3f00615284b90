pub mod aggregate;
pub mod calibration;
pub mod reconcile;
