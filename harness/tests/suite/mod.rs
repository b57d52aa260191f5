// Aggregates all former standalone integration tests as modules.
mod cli;
mod fakes;
mod validation;
