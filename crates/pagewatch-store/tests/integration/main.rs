mod common;
mod monitor_tests;
mod store_tests;
