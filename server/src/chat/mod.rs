pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod service;
pub mod store;
