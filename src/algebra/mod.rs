pub mod math;

pub use math::{MathError, Matrix, Share, Vector};
