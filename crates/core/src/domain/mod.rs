pub mod history;
pub mod identity;
pub mod request;
pub mod stats;
