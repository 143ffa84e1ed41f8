pub mod runs;
pub mod sensitivity;
pub mod underwriting;
