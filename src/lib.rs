pub mod codegen;
pub mod common;
pub mod ir;
pub mod kernels;
pub mod profile;
pub mod utils;
