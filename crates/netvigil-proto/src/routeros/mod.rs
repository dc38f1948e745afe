//! RouterOS API client: sentence codec and authenticated sessions.

pub mod codec;
pub mod session;

pub use codec::{Command, Reply, ReplyKind, Row, Sentence, SentenceCodec};
pub use session::RouterOsSession;
