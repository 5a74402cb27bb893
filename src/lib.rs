pub mod alignment;
pub mod bitset;
pub mod character;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod mocks;
pub mod prob;
pub mod sim;
pub mod tree;
