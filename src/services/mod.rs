pub mod commerce;
pub mod notifications;
pub mod payments;
