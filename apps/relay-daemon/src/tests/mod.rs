mod daemon;
mod error;
mod logger;
mod settings;
