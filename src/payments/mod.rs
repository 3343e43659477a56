mod stripe;

pub use stripe::*;
