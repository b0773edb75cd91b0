pub mod assignment;
pub mod booking;
pub mod codes;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod routes;
pub mod state;
pub mod status;
pub mod store;
pub mod validator;
