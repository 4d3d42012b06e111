//! Bearer-token HTTP client over a [`tokenline_oauth::TokenLifecycle`].

pub mod messages;

pub use messages::{ClientError, MessagesClient, SendOptions};
