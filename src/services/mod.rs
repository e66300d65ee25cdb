pub mod authorization;
pub mod booking;
pub mod credentials;
#[cfg(test)]
pub mod fake;
pub mod google;
pub mod rooms;
pub mod signature;
pub mod slack;
