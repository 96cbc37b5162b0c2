pub mod chat_llm;
pub mod memory;
pub mod pg_auth;
pub mod pg_store;
pub mod veo;

pub use chat_llm::OpenAiChatAdapter;
pub use memory::{MemoryAuth, MemoryStore};
pub use pg_auth::PgAuthProvider;
pub use pg_store::PgDocumentStore;
pub use veo::VeoVideoAdapter;
