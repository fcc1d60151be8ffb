//! Selfie Quiz: a multiple-choice quiz that starts with a selfie, plus the
//! admin panel that authors the questions and reviews the selfies.

pub mod auth;
pub mod camera;
pub mod db;
pub mod entry;
pub mod error;
pub mod panel;
pub mod question;
pub mod question_store;
pub mod render;
pub mod selfie;
pub mod session;

pub use error::{Error, Result};
