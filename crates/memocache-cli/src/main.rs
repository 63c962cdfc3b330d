//! Memocache.
//!
//! Command line front-end of the memoizing cache. It maintains a cache directory and memoizes
//! the output of arbitrary programs in it.

#![warn(missing_docs, missing_debug_implementations, clippy::all)]

mod cli;
mod commands;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
