pub mod auth;
pub mod connections;
pub mod health;
pub mod doctors;
pub mod notifications;
pub mod progress;
pub mod tasks;
pub mod updates;
pub mod videos;
