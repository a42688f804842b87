pub mod document;
pub mod errors;
pub mod options;
