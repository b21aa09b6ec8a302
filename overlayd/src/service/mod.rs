pub mod database;
pub mod overlays;
