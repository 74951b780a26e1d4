//! Collaborator contracts and injected services: the session context,
//! the URL-backed file cache, and helper executable discovery.

mod cached_file;
mod context;
mod helper_path;

pub use cached_file::{CachedFile, HttpRetriever, Retriever};
pub use context::{Preferences, SessionContext, TempDirectory};
pub use helper_path::{HelperExec, HelperExecPath, SearchType};
