use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Progress notifications emitted by the worker pool.
///
/// The pipeline never prints directly; it sends these over a channel so the
/// reporting surface stays swappable.
#[derive(Clone, Debug)]
pub enum ScrapeEvent {
    /// A worker picked up a job.
    JobStarted {
        card_name: String,
        condition: String,
        printing: String,
        index: usize,
        total: usize,
        attempt: u32,
    },
    /// A job harvested its full recency window.
    JobSucceeded { card_name: String, records: usize },
    /// A job failed; `requeued` tells whether a fresh copy went back on the
    /// queue.
    JobFailed {
        card_name: String,
        attempt: u32,
        reason: String,
        requeued: bool,
    },
    /// The queue drained and the pool shut down.
    BatchComplete { succeeded: usize, failed: usize },
}

/// Sending half handed to the pool and its workers.
#[derive(Clone, Debug)]
pub struct Reporter {
    sender: mpsc::UnboundedSender<ScrapeEvent>,
}

impl Reporter {
    /// Queue an event for the console task.
    pub fn send(&self, event: ScrapeEvent) {
        // The console task only goes away during shutdown; dropping the
        // event is the right thing then.
        let _ = self.sender.send(event);
    }
}

/// Builds a reporter and the receiving end of its channel, for consumers
/// other than the console task.
pub fn channel() -> (Reporter, mpsc::UnboundedReceiver<ScrapeEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Reporter { sender }, receiver)
}

/// Builds the event channel and spawns the console task that renders each
/// event as one progress line.
pub fn console_reporter() -> (Reporter, JoinHandle<()>) {
    let (reporter, mut receiver) = channel();
    let task = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            render(&event);
        }
    });
    (reporter, task)
}

fn render(event: &ScrapeEvent) {
    match event {
        ScrapeEvent::JobStarted {
            card_name,
            condition,
            printing,
            index,
            total,
            attempt,
        } => {
            let percent = (*index as f64 + 1.0) / (*total).max(1) as f64 * 100.0;
            let retry_note = if *attempt > 1 {
                format!(" (attempt {attempt})")
            } else {
                String::new()
            };
            println!(
                "🤖 Scraping {card_name} Condition: {condition} Printing: {printing} — {}/{total} ({percent:.1}%){retry_note}",
                index + 1,
            );
        }
        ScrapeEvent::JobSucceeded { card_name, records } => {
            println!("✅ {card_name}: {records} records collected");
        }
        ScrapeEvent::JobFailed {
            card_name,
            attempt,
            reason,
            requeued: true,
        } => {
            println!("🔄 {card_name} failed on attempt {attempt}: {reason} — re-queuing");
        }
        ScrapeEvent::JobFailed {
            card_name,
            attempt,
            reason,
            requeued: false,
        } => {
            println!("🚫 {card_name} dropped after {attempt} attempt(s): {reason}");
        }
        ScrapeEvent::BatchComplete { succeeded, failed } => {
            println!("✅ All cards processed — {succeeded} succeeded, {failed} dropped");
        }
    }
}
