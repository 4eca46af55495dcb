pub mod element;
pub mod error;
pub mod notification;
pub mod source;
