mod client_addr;

pub use self::client_addr::*;
