pub mod catalog;
pub mod identity;
pub mod pricing;
pub mod request;
