// Public library interface for dirtally
// The CLI binary and external front-ends use the core modules through here.

pub mod scanner;
pub mod tree;
