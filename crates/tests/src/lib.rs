//! Cross-filter integration tests

#[cfg(test)]
mod filter_integration;
