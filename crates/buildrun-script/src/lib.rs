//! Restricted build-script language for BuildRun jobs.
//!
//! A job's build procedure is a small brace-delimited program whose only
//! way to affect the world is through two host primitives:
//!
//! ```text
//! fn pillar(x, z, h) {
//!     fill(x, 0, z, x, h, z, "quartz_pillar", {states: {axis: "y"}});
//! }
//!
//! let size = 5;
//! for x in range(0, size) {
//!     for z in range(0, size) {
//!         place(x, 0, z, "stone");
//!     }
//! }
//! pillar(0, 0, 4);
//! place(2, 1, 0, "oak_door", {states: {half: "lower"}, mode: "keep"});
//! ```
//!
//! Scripts cannot read files, open sockets or observe time. Execution is
//! bounded by [`Limits`].

mod ast;
mod error;
mod interp;
mod lexer;
mod parser;
mod value;

pub use error::ScriptError;
pub use interp::{Host, Limits, RunStats};
pub use value::Value;

/// A parsed build script, ready to run against any [`Host`].
#[derive(Debug, Clone)]
pub struct Script {
    program: Vec<ast::Stmt>,
}

impl Script {
    /// Parse script source.
    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        let tokens = lexer::tokenize(source)?;
        let program = parser::Parser::new(tokens).parse_program()?;
        Ok(Self { program })
    }

    /// Run the script, issuing primitives to `host`.
    ///
    /// Primitives issued before an error stay issued; the rest of the script
    /// is abandoned.
    pub fn run<H: Host>(&self, host: &mut H, limits: &Limits) -> Result<RunStats, ScriptError> {
        interp::Interpreter::new(host, limits).run(&self.program)
    }
}
