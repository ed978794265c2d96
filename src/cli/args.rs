//! Command-line argument parsing
//!
//! Everything beyond the image name comes from the environment, see
//! [`crate::config::Config::from_env`].

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "image-pusher")]
#[command(about = "Push a locally built container image to its registry")]
#[command(version)]
pub struct Args {
    /// Image to push, e.g. `my-app` or `ghcr.io/team/app:1.0`
    pub image: String,

    #[arg(long, short = 'v', help = "Enable debug logging and per-blob output")]
    pub verbose: bool,
}
