pub mod calendar;
pub mod matcher;
pub mod models;
pub mod normalize;
