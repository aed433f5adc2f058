// Session bookkeeping: creation, activity tracking, history and expiry

pub mod service;

pub use service::SessionService;
