//! Terminal progress bars for stream transfers.

use bili_dl::fetcher::TransferEvent;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "{msg:32!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.blue} {msg:32!} {bytes} ({bytes_per_sec})";

/// One bar per file being transferred.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ProgressBoard {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }

    /// A callback for [`bili_dl::fetcher::Fetcher::with_progress_callback`].
    pub fn callback(self: &Arc<Self>) -> impl for<'a> Fn(TransferEvent<'a>) + Send + Sync + 'static {
        let board = Arc::clone(self);
        move |event: TransferEvent<'_>| board.handle(event)
    }

    pub fn handle(&self, event: TransferEvent<'_>) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);

        match event {
            TransferEvent::Started { name, total } => {
                // A retry starts over with a fresh bar.
                if let Some(previous) = bars.remove(name) {
                    previous.finish_and_clear();
                }

                let bar = self.multi.add(new_bar(total));
                bar.set_message(name.to_string());
                bars.insert(name.to_string(), bar);
            }
            TransferEvent::Advanced {
                name, downloaded, ..
            } => {
                if let Some(bar) = bars.get(name) {
                    bar.set_position(downloaded);
                }
            }
            TransferEvent::Finished { name } | TransferEvent::Abandoned { name } => {
                if let Some(bar) = bars.remove(name) {
                    bar.finish_and_clear();
                    self.multi.remove(&bar);
                }
            }
        }
    }

    /// The number of bars currently shown.
    pub fn active(&self) -> usize {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn new_bar(total: u64) -> ProgressBar {
    if total == 0 {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_style(
            ProgressStyle::with_template(SPINNER_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        return bar;
    }

    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(BAR_TEMPLATE)
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}
