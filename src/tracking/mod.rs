pub mod decode;
pub mod feed;
pub mod types;
pub mod vendor;
