pub mod binary;
pub mod converter;
pub mod cookies;
pub mod extractor;
pub mod slot;
