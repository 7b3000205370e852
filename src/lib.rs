#[macro_use]
extern crate tracing;

mod app;
pub mod args;
mod logging;
mod render;

pub use app::App;
pub use args::Args;
pub use logging::init_logging;

pub fn init_errors() -> color_eyre::Result<()> {
    color_eyre::install()
}
