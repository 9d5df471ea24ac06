pub mod action;
pub mod domain;
pub mod error;
pub mod protocol;
