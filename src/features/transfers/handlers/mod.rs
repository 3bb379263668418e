mod transfer_handler;

pub use transfer_handler::*;
