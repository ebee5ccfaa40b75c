mod common;
mod gateway;
mod schema;
