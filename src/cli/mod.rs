mod groups;
mod hash;
mod run;
pub mod server;
mod stats;

pub use groups::*;
pub use hash::*;
pub use run::*;
pub use server::*;
pub use stats::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
