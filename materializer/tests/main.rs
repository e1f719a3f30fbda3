mod common;
mod metamodel;
