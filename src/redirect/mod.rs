pub mod handlers;

pub use handlers::{redirect_link, CACHE_HIT_HEADER};
