mod transfer;

pub use transfer::Transfer;
