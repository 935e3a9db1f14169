//! Schema generation from model metadata and OpenAPI document assembly.

pub mod generate;
pub mod openapi;
