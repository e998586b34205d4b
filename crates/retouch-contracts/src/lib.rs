pub mod edits;
pub mod envelope;
