//! Route modules for the upload server

pub mod health;
pub mod s3;
pub mod upload;
