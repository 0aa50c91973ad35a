pub mod driver;
pub mod normalize;
pub mod simplify;
pub mod types;
