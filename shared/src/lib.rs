mod models;
pub mod utils;

pub use models::*;
pub use utils::*;
pub mod async_rayon;
pub mod sqs_util;
