pub mod campaign;
pub mod contact;
pub mod user;
