pub mod csrf;
pub mod customers;
pub mod health;
pub mod pages;
pub mod payment;
pub mod session;
