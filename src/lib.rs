pub mod board;
pub mod error;
pub mod k8s;
