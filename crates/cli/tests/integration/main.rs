mod common;
mod container_tests;
mod help_tests;
mod image_tests;
