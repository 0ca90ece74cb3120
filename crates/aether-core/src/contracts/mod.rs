//! Framework-neutral value types shared by every component: requests,
//! results, contexts, tool schemas, and stream chunks.

pub mod configs;
pub mod contexts;
pub mod enums;
pub mod requests;
pub mod responses;
pub mod runner;
pub mod session;
pub mod streaming;

pub use configs::*;
pub use contexts::*;
pub use enums::*;
pub use requests::*;
pub use responses::*;
pub use runner::*;
pub use session::*;
pub use streaming::*;
