mod common;
mod inference_tests;
mod scenario_tests;
