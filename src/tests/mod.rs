// src/tests/mod.rs

mod breaker_tests;
mod limiter_tests;
