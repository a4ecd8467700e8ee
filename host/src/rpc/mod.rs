pub mod client;
pub mod convert;
pub mod proto;

pub use client::GrpcConfigPlugin;
