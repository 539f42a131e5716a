use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub fn create_progress_bar(multi: &MultiProgress) -> Result<ProgressBar> {
    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} {bytes} extracted ({binary_bytes_per_sec})\n{msg} | elapsed: {elapsed_precise}",
    )?);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("starting session");
    Ok(pb)
}

pub fn finalize_progress_bar(pb: &Option<ProgressBar>, ok: bool) {
    if let Some(pb) = pb {
        if ok {
            pb.finish_with_message("demux complete");
        } else {
            pb.abandon_with_message("demux failed");
        }
    }
}
