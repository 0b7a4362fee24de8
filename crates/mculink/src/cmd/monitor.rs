use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mculink_channel::ids;
use tracing::warn;

use crate::cmd::read::read_value;
use crate::cmd::{open_session, parse_duration, resolve_id, LinkArgs, MonitorArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS};
use crate::output::{print_reading, print_stats, OutputFormat, Reading};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

pub fn run(args: MonitorArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let id = resolve_id(&args.param)?;
    let interval = parse_duration(&args.interval)?;
    let session = open_session(link)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut sample = 0u64;
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        match read_value(&session.engine, id, args.kind) {
            Ok(value) => print_reading(
                &Reading {
                    id,
                    name: ids::param_name(id),
                    value: &value,
                    sample: Some(sample),
                },
                format,
            ),
            // A missed poll is logged; the link stays usable.
            Err(err) if err.is_timeout() => warn!(sample, error = %err, "poll missed"),
            Err(err) => return Err(channel_error("poll failed", err)),
        }
        sample += 1;

        if args.count.is_some_and(|count| sample >= count) {
            break;
        }
        while running.load(Ordering::SeqCst) && started.elapsed() < interval {
            thread::sleep(SLEEP_SLICE.min(interval.saturating_sub(started.elapsed())));
        }
    }

    if args.stats {
        print_stats(&session.engine.stats(), format);
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
