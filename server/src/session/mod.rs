pub mod coordinator;
pub mod state;
pub mod store;

pub use coordinator::{JoinOutcome, SessionCoordinator, SessionError};
pub use state::{Session, SessionConfig, SessionId};
pub use store::{MemorySessionStore, SessionRecord, SessionStore, StoreError};
