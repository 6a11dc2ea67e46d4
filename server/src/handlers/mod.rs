//! Request handlers for collections, documents and migrations.

mod documents;
mod migration;
mod promote;

pub use documents::*;
pub use migration::*;
pub use promote::*;
