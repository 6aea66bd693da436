//! The default command: render all configured maps.

use clap::Args;
use tracing::{error, info};

use blockmap::config::Config;
use blockmap::dispatch::{LogProgress, NullProgress, ProgressSink};
use blockmap::manager::{RenderBehaviors, RenderManager};

#[derive(Args)]
pub struct RenderArgs {
    /// Number of render worker threads
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Suppress progress output (for cron jobs and CI)
    #[arg(short, long)]
    pub batch: bool,

    /// Skip these maps (or single rotations, as map:rotation)
    #[arg(short = 'r', long = "render-skip", value_name = "MAP[:ROTATION]")]
    pub render_skip: Vec<String>,

    /// Render these maps incrementally (the default behavior)
    #[arg(long = "render-auto", value_name = "MAP[:ROTATION]")]
    pub render_auto: Vec<String>,

    /// Re-render these maps completely
    #[arg(long = "render-force", value_name = "MAP[:ROTATION]")]
    pub render_force: Vec<String>,

    /// Skip everything not explicitly selected
    #[arg(long)]
    pub skip_all: bool,
}

pub fn run(config: &Config, args: &RenderArgs) -> i32 {
    let behaviors = RenderBehaviors::from_selectors(
        config,
        args.skip_all,
        &args.render_skip,
        &args.render_auto,
        &args.render_force,
    );

    info!(
        "render started at {}",
        chrono::Local::now().format("%d %b %Y, %H:%M:%S")
    );

    let mut manager = RenderManager::new(config.clone());
    manager.set_behaviors(behaviors);

    let progress: Box<dyn ProgressSink> = if args.batch {
        Box::new(NullProgress)
    } else {
        Box::new(LogProgress::new())
    };

    match manager.run(args.jobs, progress.as_ref()) {
        Ok(true) => {
            info!(
                "render finished at {}",
                chrono::Local::now().format("%d %b %Y, %H:%M:%S")
            );
            0
        }
        Ok(false) => {
            error!("some maps failed to render");
            1
        }
        Err(err) => {
            error!("render aborted: {}", err);
            1
        }
    }
}
