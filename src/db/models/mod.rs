pub mod newspaper;
pub mod payment;
pub mod subscription;
pub mod user;
