pub mod batches;
pub mod core;
pub mod imports;
pub mod reference;
pub mod settings;
