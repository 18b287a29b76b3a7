// Library exports for testing
// The binary (main.rs) imports these as well

pub mod daemon;
pub mod error;
pub mod logger;
pub mod settings;

#[cfg(test)]
mod tests;
