pub mod marginal;
pub mod sir;
pub mod train;
pub mod vi;
