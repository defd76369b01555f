//! API handlers
//!
//! Author: hephaex@gmail.com

pub mod auth;
pub mod checkins;
pub mod events;
pub mod health;
