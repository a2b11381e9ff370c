pub mod example;

pub use example::ExampleExtension;
