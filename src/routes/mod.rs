pub mod health;
pub mod perms;
pub mod residents;
