mod foreground;

pub use foreground::{CollectiveLoop, DEFAULT_OP_INTERVAL};
