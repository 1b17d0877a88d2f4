use indicatif::{ProgressBar, ProgressStyle};

use strongbox::status::{Status, StatusBus, Subscription};
use strongbox::types::Processing;

/// Terminal progress bar following the events of a [`StatusBus`].
pub struct Bar {
    bar: ProgressBar,
    _subscription: Subscription,
}

impl Bar {
    pub fn attach(status: &StatusBus, processing: Processing) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{msg:24} [{bar:40.cyan/blue}] {pos:>3}% ({elapsed})").unwrap_or_else(|_| ProgressStyle::default_bar()).progress_chars("●○ ");
        bar.set_style(style);
        bar.set_message(processing.label());

        let view = bar.clone();
        let subscription = status.subscribe(move |event| match event {
            Status::Start => view.reset(),
            Status::Update { message, percent } => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let position = percent.clamp(0.0, 100.0).round() as u64;
                view.set_message(message.clone());
                view.set_position(position);
            }
            Status::End => view.finish_with_message("Done"),
            Status::Error(err) => view.abandon_with_message(format!("Failed: {err}")),
        });

        Self { bar, _subscription: subscription }
    }
}

impl Drop for Bar {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish();
        }
    }
}
