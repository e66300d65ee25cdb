pub mod health;
pub mod ncal;
