mod factory_tests;
mod support;
mod transient_tests;
