pub mod auth;
pub mod chat;
pub mod comments;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod toggles;
