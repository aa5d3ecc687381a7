//! Log sink setup. Stdout always gets a line; a rolling per-day file sink is
//! added on top when `[log] file-directory` is configured, mirroring the
//! teacher lineage's `fern` + `DateBased` setup.

use std::fs::create_dir_all;

use anyhow::Result;
use fern::Dispatch;

use crate::config::Config;

pub fn init(config: &Config) -> Result<()> {
    let mut dispatch = Dispatch::new()
        .level(config.log.level.as_level().to_level_filter())
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] ({}) {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());

    if let Some(dir) = &config.log.file_directory {
        create_dir_all(dir)?;
        dispatch = dispatch.chain(fern::DateBased::new(dir, "termgate-%Y-%m-%d.log"));
    }

    dispatch.apply()?;
    Ok(())
}
