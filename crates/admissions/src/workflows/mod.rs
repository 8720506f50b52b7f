pub mod enrollment;
pub mod intake;
