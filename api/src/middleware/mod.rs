pub mod admission;
pub mod cors;
