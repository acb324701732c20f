pub mod fields;
pub mod geo;
pub mod metadata;
pub mod parser;
pub mod pipeline;
